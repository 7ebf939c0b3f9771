//! Pre-decision snapshots of state data.
//!
//! Before each decider invocation the runtime stashes the current data so a
//! panicking decider cannot corrupt what the error handler sees. The copy is
//! a serialize/deserialize round trip through the user serializer rather than
//! a structural clone: the stash must match what would have been persisted,
//! and the round trip guarantees it.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tiller_core::serializer::StateSerializer;

use crate::error::{Result, TillerError};

#[derive(Clone)]
pub struct Stasher {
    serializer: Arc<dyn StateSerializer>,
}

impl Stasher {
    pub fn new(serializer: Arc<dyn StateSerializer>) -> Self {
        Stasher { serializer }
    }

    pub fn stash<T: Serialize>(&self, data: &T) -> Result<String> {
        self.serializer
            .as_ref()
            .serialize(data)
            .map_err(TillerError::StateSerialization)
    }

    pub fn unstash<T: DeserializeOwned>(&self, stashed: &str) -> Result<T> {
        self.serializer
            .as_ref()
            .deserialize(stashed)
            .map_err(TillerError::StateDeserialization)
    }
}

impl std::fmt::Debug for Stasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stasher").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tiller_core::serializer::JsonStateSerializer;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Nested {
        items: Vec<String>,
    }

    #[test]
    fn test_stash_is_a_deep_copy() {
        let stasher = Stasher::new(Arc::new(JsonStateSerializer));
        let mut data = Nested {
            items: vec!["one".to_string()],
        };

        let stashed = stasher.stash(&data).unwrap();
        data.items.push("two".to_string());

        let restored: Nested = stasher.unstash(&stashed).unwrap();
        assert_eq!(restored.items, vec!["one".to_string()]);
        assert_eq!(data.items.len(), 2);
    }

    #[test]
    fn test_unstash_garbage_fails() {
        let stasher = Stasher::new(Arc::new(JsonStateSerializer));
        let result: Result<Nested> = stasher.unstash("{broken");
        assert!(matches!(result, Err(TillerError::StateDeserialization(_))));
    }
}
