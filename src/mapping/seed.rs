use std::path::PathBuf;

use diesel::upsert::excluded;
use diesel::*;
use serde::Deserialize;
use tracing::info;

use crate::database::PgPool;
use crate::errors::Error;
use crate::ingest::dictionaries::Dictionaries;
use crate::models::RuleCommand;

/// Seeds mapping rules and their (master type, child type) assignments
/// from a CSV file.
pub struct Rules {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CSVRecord {
    /// Unique rule name, the upsert key
    name: String,
    /// One of equals, contains, startswith, endswith, regex
    command: RuleCommand,
    /// Optional pattern. Empty means the child value is the needle
    pattern: Option<String>,
    #[serde(default)]
    ai: bool,
    #[serde(default)]
    human: bool,
    enabled: Option<bool>,
    /// Node type names, created in the dictionaries when missing
    master_node_type: String,
    child_node_type: String,
    priority: i32,
}

impl Rules {
    /// Import rules if they are not already in the table. This is an upsert
    /// keyed on the rule name and will refresh the command, pattern, flags
    /// and assignment priority.
    pub fn import(&self, pool: &PgPool) -> Result<(), Error> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut conn = pool.get()?;
        let mut dictionaries = Dictionaries::new(None);
        let mut total = 0;

        for result in reader.deserialize() {
            let record: CSVRecord = result?;
            let enabled_flag = record.enabled.unwrap_or(true);

            let master_type = dictionaries.node_type(&mut conn, &record.master_node_type)?;
            let child_type = dictionaries.node_type(&mut conn, &record.child_node_type)?;

            let rule = {
                use crate::schema::mapping_rules::dsl::*;

                diesel::insert_into(mapping_rules)
                    .values((
                        name.eq(&record.name),
                        command.eq(record.command),
                        pattern.eq(&record.pattern),
                        ai.eq(record.ai),
                        human.eq(record.human),
                        enabled.eq(enabled_flag),
                    ))
                    .on_conflict(name)
                    .do_update()
                    .set((
                        command.eq(excluded(command)),
                        pattern.eq(excluded(pattern)),
                        ai.eq(excluded(ai)),
                        human.eq(excluded(human)),
                        enabled.eq(excluded(enabled)),
                    ))
                    .returning(id)
                    .get_result::<i64>(&mut conn)?
            };

            {
                use crate::schema::rule_assignments::dsl::*;

                diesel::insert_into(rule_assignments)
                    .values((
                        rule_id.eq(rule),
                        master_node_type_id.eq(master_type),
                        child_node_type_id.eq(child_type),
                        priority.eq(record.priority),
                        enabled.eq(enabled_flag),
                    ))
                    .on_conflict((rule_id, master_node_type_id, child_node_type_id))
                    .do_update()
                    .set((priority.eq(excluded(priority)), enabled.eq(excluded(enabled))))
                    .execute(&mut conn)?;
            }

            total += 1;
        }

        info!(total, "Mapping rules imported");
        Ok(())
    }
}
