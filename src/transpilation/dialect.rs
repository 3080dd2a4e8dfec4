//! The SQL dialect trait

use crate::containers::Schema;
use crate::data_model::Role;

/// Everything the transpiler needs to know about a target dialect.
///
/// A dialect quotes identifiers, rewrites internal column names into
/// staging-table names, and renders the staging DDL. Feature and
/// preprocessor SQL is assembled by the callers from these parts.
pub trait SqlDialect: Send + Sync {
    /// Opening identifier quote.
    fn quotechar1(&self) -> &str;

    /// Closing identifier quote.
    fn quotechar2(&self) -> &str;

    fn drop_table_if_exists(&self, table: &str) -> String {
        format!(
            "DROP TABLE IF EXISTS {}{}{};\n\n",
            self.quotechar1(),
            table.to_uppercase(),
            self.quotechar2()
        )
    }

    /// The staging-table name of the `ix`-th staged table (population is 1).
    fn make_staging_table_name(&self, name: &str) -> String {
        format!("{}__STAGING_TABLE", name.to_uppercase().replace(' ', "_"))
    }

    /// Rewrites an internal column name into the one users see in staging
    /// tables.
    fn make_staging_table_colname(&self, colname: &str) -> String;

    /// A quoted, rewritten column reference with a table alias.
    fn make_colname(&self, alias: &str, colname: &str) -> String {
        format!(
            "{}.{}{}{}",
            alias,
            self.quotechar1(),
            self.make_staging_table_colname(colname),
            self.quotechar2()
        )
    }

    /// `CREATE TABLE` staging DDL for the population table and every
    /// peripheral table, in declaration order.
    fn make_staging_tables(&self, population: &Schema, peripheral: &[Schema]) -> Vec<String>;

    /// The SQL type used for a role.
    fn sql_type(&self, role: Role) -> &str {
        match role {
            Role::Categorical | Role::JoinKey | Role::Text | Role::UnusedString => "TEXT",
            _ => "DOUBLE PRECISION",
        }
    }

    // --------------------------------------------------------------
    // Category-trimming mapping tables

    /// DDL for a trimming mapping table.
    fn trimming_header(&self, table: &str) -> String {
        let mut sql = self.drop_table_if_exists(table);
        sql.push_str(&format!(
            "CREATE TABLE \"{}\" (\"key\" TEXT, \"value\" TEXT);\n",
            table.to_uppercase()
        ));
        sql
    }

    /// One `INSERT INTO` statement for a batch of kept categories.
    fn trimming_insert_into(&self, table: &str, rows: &[(String, String)]) -> String {
        let values: Vec<String> = rows
            .iter()
            .map(|(key, value)| format!("('{}', '{}')", key.replace('\'', "''"), value.replace('\'', "''")))
            .collect();
        format!(
            "INSERT INTO \"{}\" (\"key\", \"value\")\nVALUES {};\n",
            table.to_uppercase(),
            values.join(",\n       ")
        )
    }

    /// The join-replacement expression rewriting a trimmed column: unseen
    /// categories collapse to the trimmed sentinel.
    fn trimming_join(&self, mapping_table: &str, colname: &str) -> String {
        format!(
            "COALESCE( ( SELECT m.\"value\" FROM \"{}\" m WHERE m.\"key\" = {}{}{} ), '(trimmed)' )",
            mapping_table.to_uppercase(),
            self.quotechar1(),
            self.make_staging_table_colname(colname),
            self.quotechar2()
        )
    }
}
