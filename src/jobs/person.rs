use serde::{Deserialize, Serialize};

use crate::core::item::{ItemProcessor, ItemProcessorResult};
use crate::BatchError;

/// One row of the person file and of the `person` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub age: i32,
}

impl Person {
    /// Why the record cannot be stored, if it cannot.
    pub fn violation(&self) -> Option<String> {
        if self.name.trim().is_empty() {
            Some(format!("person {} has an empty name", self.id))
        } else if self.email.trim().is_empty() {
            Some(format!("person {} has an empty email", self.id))
        } else if self.age < 0 {
            Some(format!("person {} has a negative age: {}", self.id, self.age))
        } else {
            None
        }
    }
}

/// Rejects persons with an empty name or email, or a negative age.
///
/// Rejections are [`BatchError::ItemProcessor`] errors, which the import
/// step's skip policy may skip.
#[derive(Default)]
pub struct PersonValidationProcessor;

impl ItemProcessor<Person, Person> for PersonValidationProcessor {
    fn process(&self, item: &Person) -> ItemProcessorResult<Person> {
        match item.violation() {
            Some(violation) => Err(BatchError::ItemProcessor(violation)),
            None => Ok(Some(item.clone())),
        }
    }
}

#[cfg(feature = "rdbc-sqlite")]
pub use binder::PersonBinder;

#[cfg(feature = "rdbc-sqlite")]
mod binder {
    use sqlx::{query_builder::Separated, Sqlite};

    use crate::item::rdbc::DatabaseItemBinder;

    use super::Person;

    /// Binds `id, name, email, age`, in that order.
    #[derive(Default)]
    pub struct PersonBinder;

    impl PersonBinder {
        pub const COLUMNS: [&'static str; 4] = ["id", "name", "email", "age"];
    }

    impl DatabaseItemBinder<Person, Sqlite> for PersonBinder {
        fn bind(&self, item: &Person, mut query_builder: Separated<Sqlite, &str>) {
            query_builder.push_bind(item.id);
            query_builder.push_bind(item.name.clone());
            query_builder.push_bind(item.email.clone());
            query_builder.push_bind(item.age);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, email: &str, age: i32) -> Person {
        Person {
            id: 7,
            name: name.to_string(),
            email: email.to_string(),
            age,
        }
    }

    #[test]
    fn valid_person_passes_through() {
        let valid = person("Ada", "ada@example.com", 36);
        let result = PersonValidationProcessor.process(&valid).unwrap();
        assert_eq!(result, Some(valid));
    }

    #[test]
    fn invalid_persons_are_rejected() {
        for invalid in [
            person("", "ada@example.com", 36),
            person("Ada", "  ", 36),
            person("Ada", "ada@example.com", -1),
        ] {
            let result = PersonValidationProcessor.process(&invalid);
            assert!(matches!(result, Err(BatchError::ItemProcessor(_))));
        }
    }
}
