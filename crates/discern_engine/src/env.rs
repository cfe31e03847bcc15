//! Evaluation environments used during propagation.

use std::sync::Arc;

use im::HashMap;

use discern_foundation::{Error, Fact, Result, Token, Value};
use discern_language::Environment;
use discern_storage::Storage;

/// Step results carried down an alpha chain.
pub(crate) type Intermediates = HashMap<Arc<str>, Value>;

/// One fact under one variable, plus the chain's step results.
pub(crate) struct FactEnv<'a> {
    pub variable: &'a str,
    pub fact: &'a Fact,
    pub intermediates: &'a Intermediates,
}

impl Environment for FactEnv<'_> {
    fn fact(&self, variable: &str) -> Option<&Fact> {
        (variable == self.variable).then_some(self.fact)
    }

    fn intermediate(&self, key: &str) -> Option<&Value> {
        self.intermediates.get(key)
    }
}

/// The facts and values of a token, loaded from storage.
#[derive(Default)]
pub(crate) struct TokenEnv {
    facts: Vec<(Arc<str>, Fact)>,
    values: Vec<(Arc<str>, Value)>,
}

impl TokenEnv {
    /// # Errors
    ///
    /// Returns `UnknownFact` when a bound fact is not in storage.
    pub fn load(token: &Token, storage: &dyn Storage) -> Result<Self> {
        let mut facts = Vec::with_capacity(token.len() + 1);
        for binding in token.bindings() {
            let fact = storage
                .get_fact(&binding.fact)
                .ok_or_else(|| Error::unknown_fact(binding.fact.clone()))?;
            facts.push((binding.variable.clone(), fact));
        }
        let values = token
            .values()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Self { facts, values })
    }

    /// Binds one more fact; undone by [`Self::pop`].
    pub fn push(&mut self, variable: Arc<str>, fact: Fact) {
        self.facts.push((variable, fact));
    }

    pub fn pop(&mut self) {
        self.facts.pop();
    }
}

impl Environment for TokenEnv {
    fn fact(&self, variable: &str) -> Option<&Fact> {
        self.facts
            .iter()
            .rev()
            .find(|(name, _)| name.as_ref() == variable)
            .map(|(_, fact)| fact)
    }

    fn value(&self, variable: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name.as_ref() == variable)
            .map(|(_, value)| value)
    }
}
