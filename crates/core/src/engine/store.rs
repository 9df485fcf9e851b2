use std::collections::BTreeMap;

use crate::domain::value::Value;
use crate::errors::EngineError;

/// Named values of one evaluation: raw answers, derived inputs, prices and calculation results.
///
/// Ordered by name so snapshots serialize identically across runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueStore {
    values: BTreeMap<String, Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Merges key by key; on duplicate keys the later entry wins.
    pub fn set_many<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in entries {
            self.set(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Numeric read used by formulas. No coercion: text and booleans are rejected.
    pub fn number(&self, name: &str) -> Result<f64, EngineError> {
        match self.values.get(name) {
            Some(Value::Number(value)) => Ok(*value),
            Some(Value::NotANumber) => Err(EngineError::NotANumber(name.to_string())),
            Some(other) => Err(EngineError::NonNumericVariable {
                name: name.to_string(),
                found: other.type_name(),
            }),
            None => Err(EngineError::MissingVariable(name.to_string())),
        }
    }

    pub fn snapshot(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ValueStore {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut store = Self::new();
        store.set_many(iter);
        store
    }
}

#[cfg(test)]
mod tests {
    use super::ValueStore;
    use crate::domain::value::Value;
    use crate::errors::EngineError;

    #[test]
    fn set_many_lets_later_keys_win() {
        let mut store = ValueStore::new();
        store.set("seats", 3.0);
        store.set_many([("seats", Value::Number(5.0)), ("plan", Value::from("pro"))]);
        store.set_many([("seats", 7.0)]);

        assert_eq!(store.get("seats"), Some(&Value::Number(7.0)));
        assert_eq!(store.get("plan"), Some(&Value::from("pro")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn numeric_reads_do_not_coerce() {
        let store: ValueStore = [
            ("seats", Value::Number(5.0)),
            ("seatsText", Value::from("5")),
            ("newsletter", Value::Bool(true)),
            ("broken", Value::NotANumber),
        ]
        .into_iter()
        .collect();

        assert_eq!(store.number("seats"), Ok(5.0));
        assert_eq!(
            store.number("seatsText"),
            Err(EngineError::NonNumericVariable { name: "seatsText".to_string(), found: "text" })
        );
        assert!(matches!(store.number("newsletter"), Err(EngineError::NonNumericVariable { .. })));
        assert_eq!(store.number("broken"), Err(EngineError::NotANumber("broken".to_string())));
        assert_eq!(store.number("absent"), Err(EngineError::MissingVariable("absent".to_string())));
    }

    #[test]
    fn snapshot_is_name_ordered() {
        let mut store = ValueStore::new();
        store.set("zeta", 1.0);
        store.set("alpha", 2.0);

        let names = store.snapshot().keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
