/// Validate predicates run after a successful `PING`
use super::CheckContext;
use crate::core::connection::Connection;
use async_trait::async_trait;
use tracing::warn;

/// Extra liveness check; any failure inside must return `false`.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, conn: &mut dyn Connection, context: &CheckContext) -> bool;
}

pub struct NoopValidator;

#[async_trait]
impl Validator for NoopValidator {
    fn name(&self) -> &str {
        "noop"
    }

    async fn validate(&self, _conn: &mut dyn Connection, _context: &CheckContext) -> bool {
        true
    }
}

/// Passes when `key` holds exactly `value`
pub struct KeyEqualityValidator {
    key: String,
    value: String,
}

impl KeyEqualityValidator {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Validator for KeyEqualityValidator {
    fn name(&self) -> &str {
        "key-equality"
    }

    async fn validate(&self, conn: &mut dyn Connection, context: &CheckContext) -> bool {
        match context.read_text(conn, &self.key).await {
            Some(found) if found == self.value => true,
            Some(found) => {
                warn!(
                    "{} holds {:?} for {}, expected {:?}",
                    conn.endpoint(),
                    found,
                    self.key,
                    self.value
                );
                false
            }
            None => {
                warn!("{} has no readable value for {}", conn.endpoint(), self.key);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Serializer, ValueCodec};
    use crate::core::connection::Connector;
    use crate::testing::MemoryCluster;

    #[tokio::test]
    async fn test_key_equality() {
        let cluster = MemoryCluster::new(&["a:1"]);
        let context = CheckContext::new("", ValueCodec::new(Serializer::Json, 0, 0));
        let validator = KeyEqualityValidator::new("probe", "alive");
        let mut conn = cluster
            .connector()
            .connect(&cluster.endpoint("a:1"))
            .await
            .unwrap();

        assert!(!validator.validate(conn.as_mut(), &context).await);

        cluster.put("a:1", "probe", "\"dead\"");
        assert!(!validator.validate(conn.as_mut(), &context).await);

        cluster.put("a:1", "probe", "\"alive\"");
        assert!(validator.validate(conn.as_mut(), &context).await);
        assert!(NoopValidator.validate(conn.as_mut(), &context).await);
    }
}
