use std::collections::HashMap;

use diesel::*;

use crate::errors::{Error, InvariantError};

/// Append-only node-type and attribute-type catalogs, keyed by the
/// lowercased name. Entries are never updated or removed; a conflicting
/// insert falls back to selecting the existing id. An intra-load memo keeps
/// repeated lookups off the database.
pub struct Dictionaries {
    load_id: Option<i64>,
    node_types: HashMap<String, i64>,
    attribute_types: HashMap<String, i64>,
}

impl Dictionaries {
    pub fn new(load_id: Option<i64>) -> Dictionaries {
        Dictionaries {
            load_id,
            node_types: HashMap::new(),
            attribute_types: HashMap::new(),
        }
    }

    pub fn node_type(&mut self, conn: &mut PgConnection, type_name: &str) -> Result<i64, Error> {
        use crate::schema::node_types::dsl::*;

        let key = type_name.to_lowercase();
        if let Some(existing) = self.node_types.get(&key) {
            return Ok(*existing);
        }

        let inserted = diesel::insert_into(node_types)
            .values((name.eq(type_name), name_lower.eq(&key), load_id.eq(self.load_id)))
            .on_conflict(name_lower)
            .do_nothing()
            .returning(id)
            .get_result::<i64>(conn)
            .optional()?;

        let resolved = match inserted {
            Some(new_id) => new_id,
            // a concurrent load or an earlier row won the insert
            None => node_types
                .filter(name_lower.eq(&key))
                .select(id)
                .get_result::<i64>(conn)
                .optional()?
                .ok_or_else(|| InvariantError::DictionaryInsert(type_name.to_string()))?,
        };

        self.node_types.insert(key, resolved);
        Ok(resolved)
    }

    pub fn attribute_type(&mut self, conn: &mut PgConnection, type_name: &str) -> Result<i64, Error> {
        use crate::schema::attribute_types::dsl::*;

        let key = type_name.to_lowercase();
        if let Some(existing) = self.attribute_types.get(&key) {
            return Ok(*existing);
        }

        let inserted = diesel::insert_into(attribute_types)
            .values((name.eq(type_name), name_lower.eq(&key), load_id.eq(self.load_id)))
            .on_conflict(name_lower)
            .do_nothing()
            .returning(id)
            .get_result::<i64>(conn)
            .optional()?;

        let resolved = match inserted {
            Some(new_id) => new_id,
            None => attribute_types
                .filter(name_lower.eq(&key))
                .select(id)
                .get_result::<i64>(conn)
                .optional()?
                .ok_or_else(|| InvariantError::DictionaryInsert(type_name.to_string()))?,
        };

        self.attribute_types.insert(key, resolved);
        Ok(resolved)
    }
}
