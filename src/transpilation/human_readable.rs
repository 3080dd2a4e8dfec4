//! Human-readable SQL generation (SQLite-flavoured)

use crate::containers::Schema;
use crate::data_model::macros;
use crate::transpilation::SqlDialect;

/// The default dialect. Output is meant to be read by people first and
/// executed against SQLite-compatible engines second; exotic aggregations
/// render as named aggregate functions the runtime is expected to provide.
#[derive(Debug, Clone, Default)]
pub struct HumanReadableSql;

impl SqlDialect for HumanReadableSql {
    fn quotechar1(&self) -> &str {
        "\""
    }

    fn quotechar2(&self) -> &str {
        "\""
    }

    fn make_staging_table_colname(&self, colname: &str) -> String {
        macros::make_readable(colname).to_lowercase()
    }

    fn make_staging_tables(&self, population: &Schema, peripheral: &[Schema]) -> Vec<String> {
        let mut statements = Vec::new();
        statements.push(self.make_one_staging_table(population, 1));
        for (ix, schema) in peripheral.iter().enumerate() {
            statements.push(self.make_one_staging_table(schema, ix + 2));
        }
        statements
    }
}

impl HumanReadableSql {
    fn make_one_staging_table(&self, schema: &Schema, number: usize) -> String {
        let table = format!("{}_{}", self.make_staging_table_name(&schema.name), number);

        let mut sql = self.drop_table_if_exists(&table);
        sql.push_str(&format!("CREATE TABLE \"{}\" (\n", table));

        let columns = schema.columns();
        for (i, (role, colname)) in columns.iter().enumerate() {
            let comma = if i + 1 < columns.len() { "," } else { "" };
            sql.push_str(&format!(
                "    \"{}\" {}{}\n",
                self.make_staging_table_colname(colname),
                self.sql_type(*role),
                comma
            ));
        }
        sql.push_str(");\n");
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_colname_rewrites_markers() {
        let dialect = HumanReadableSql;
        let name = format!("{}ts{}", macros::MONTH_BEGIN, macros::SEASONAL_END);
        assert_eq!(dialect.make_staging_table_colname(&name), "month( ts )");
    }

    #[test]
    fn test_staging_tables() {
        let dialect = HumanReadableSql;
        let mut population = Schema::new("population");
        population.join_keys.push("id".to_string());
        population.targets.push("y".to_string());

        let mut orders = Schema::new("orders");
        orders.join_keys.push("id".to_string());
        orders.numericals.push("price".to_string());

        let statements = dialect.make_staging_tables(&population, &[orders]);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("POPULATION__STAGING_TABLE_1"));
        assert!(statements[1].contains("ORDERS__STAGING_TABLE_2"));
        assert!(statements[1].contains("\"price\" DOUBLE PRECISION"));
    }
}
