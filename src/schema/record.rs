use super::Schema;
use crate::error::{TabulaError, TabulaResult};
use crate::types::FieldValue;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

/// Read access to a record's fields by column path
pub trait FieldSource {
    /// Value at `path` (`field` or `field.attr`); `Null` when absent
    fn field(&self, path: &str) -> FieldValue;

    /// Child records of the named sub-collection field
    fn sub_records(&self, _field: &str) -> Vec<&dyn FieldSource> {
        Vec::new()
    }
}

/// Write access used by the importer
pub trait FieldSink {
    /// Assign a decoded value. Errors carry a short human-readable reason.
    fn set_field(&mut self, path: &str, value: FieldValue) -> Result<(), String>;
}

/// A record type with a statically described schema
pub trait Tabular: FieldSource + FieldSink + Default + 'static {
    /// Build the column layout for this type. Called once per process.
    fn describe() -> TabulaResult<Schema>;

    fn schema() -> TabulaResult<Arc<Schema>> {
        schema_of::<Self>()
    }
}

type Registry = RwLock<HashMap<TypeId, Arc<Schema>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Cached schema for `T`. Safe to call from several threads.
pub fn schema_of<T: Tabular>() -> TabulaResult<Arc<Schema>> {
    let id = TypeId::of::<T>();
    {
        let read = registry().read().unwrap_or_else(PoisonError::into_inner);
        if let Some(schema) = read.get(&id) {
            return Ok(Arc::clone(schema));
        }
    }

    let schema = Arc::new(T::describe()?);
    if schema.is_empty() {
        return Err(TabulaError::Schema(format!(
            "Record type '{}' declares no columns",
            schema.name()
        )));
    }
    debug!(schema = %schema.name(), columns = schema.width(), "Schema registered");

    let mut write = registry().write().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(write.entry(id).or_insert(schema)))
}

/// Split `dept.name` into `("dept", Some("name"))`
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DESCRIBE_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Probe {
        name: String,
    }

    impl FieldSource for Probe {
        fn field(&self, path: &str) -> FieldValue {
            match path {
                "name" => FieldValue::Text(self.name.clone()),
                _ => FieldValue::Null,
            }
        }
    }

    impl FieldSink for Probe {
        fn set_field(&mut self, path: &str, value: FieldValue) -> Result<(), String> {
            match path {
                "name" => {
                    self.name = value.to_text();
                    Ok(())
                }
                other => Err(format!("unknown field '{other}'")),
            }
        }
    }

    impl Tabular for Probe {
        fn describe() -> TabulaResult<Schema> {
            DESCRIBE_CALLS.fetch_add(1, Ordering::SeqCst);
            Schema::builder("probe")
                .column(ColumnDescriptor::new("name", "Name"))
                .build()
        }
    }

    #[derive(Default)]
    struct Empty;

    impl FieldSource for Empty {
        fn field(&self, _path: &str) -> FieldValue {
            FieldValue::Null
        }
    }

    impl FieldSink for Empty {
        fn set_field(&mut self, _path: &str, _value: FieldValue) -> Result<(), String> {
            Ok(())
        }
    }

    impl Tabular for Empty {
        fn describe() -> TabulaResult<Schema> {
            Schema::builder("empty").build()
        }
    }

    #[test]
    fn test_schema_is_described_once() {
        let a = Probe::schema().unwrap();
        let calls = DESCRIBE_CALLS.load(Ordering::SeqCst);
        let b = schema_of::<Probe>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(DESCRIBE_CALLS.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_schema_shared_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| Probe::schema().map(|s| s.width())))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 1);
        }
    }

    #[test]
    fn test_empty_schema_rejected() {
        assert!(matches!(Empty::schema(), Err(TabulaError::Schema(_))));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("dept.name"), ("dept", Some("name")));
        assert_eq!(split_path("dept.leader.phone"), ("dept", Some("leader.phone")));
        assert_eq!(split_path("id"), ("id", None));
    }
}
