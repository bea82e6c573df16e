//! Table of managed server definitions, keyed by server key.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::DispatchError;
use crate::games::{ArmaReforger, GameDefinition};

#[derive(Default)]
pub struct Registry {
    games: BTreeMap<String, Arc<dyn GameDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in definition.
    pub fn with_builtin() -> Self {
        let games: BTreeMap<String, Arc<dyn GameDefinition>> = builtin()
            .into_iter()
            .map(|game| (game.key().as_str().to_string(), game))
            .collect();
        Self { games }
    }

    pub fn register(&mut self, game: Arc<dyn GameDefinition>) -> Result<(), DispatchError> {
        let key = game.key().as_str().to_string();
        if self.games.contains_key(&key) {
            return Err(DispatchError::DuplicateServer { key });
        }
        self.games.insert(key, game);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn GameDefinition>, DispatchError> {
        self.games
            .get(key)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownServer {
                key: key.to_string(),
                available: self.keys(),
            })
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.games.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn GameDefinition>> {
        self.games.values()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

fn builtin() -> Vec<Arc<dyn GameDefinition>> {
    vec![Arc::new(ArmaReforger::new())]
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("keys", &self.keys()).finish()
    }
}
