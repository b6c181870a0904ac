use eorm_core::{Record, Value};

/// Builds a `Record` from `(column, value)` pairs in the given order —
/// shorthand for driver/integration tests that would otherwise repeat a
/// chain of `Record::new().set(..)` calls per row.
pub fn record(pairs: &[(&str, Value)]) -> Record {
    let mut r = Record::new();
    for (key, value) in pairs {
        r.set(*key, value.clone());
    }
    r
}

/// A small `users(id, name, email)` row fixture, useful as the default shape
/// for query builder and batch executor tests.
pub fn user_row(id: i64, name: &str, email: &str) -> Record {
    record(&[
        ("id", Value::Int(id)),
        ("name", Value::Text(name.to_string())),
        ("email", Value::Text(email.to_string())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_preserves_pair_order() {
        let r = record(&[("b", Value::Int(1)), ("a", Value::Int(2))]);
        assert_eq!(r.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
