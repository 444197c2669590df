//! SQL for the producer side: one generic trigger function that publishes
//! any changed row on the shared channel, attached per table.

use tokio_postgres::Client;
use tracing::info;

use super::connection::quote_identifier;
use crate::Result;

pub const TRIGGER_FUNCTION: &str = "notify_data_change";

/// Quotes a string literal for inline SQL.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders the trigger function publishing on `channel`.
///
/// The payload is `{"table", "operation", "data", "timestamp"}`; for
/// `DELETE` the row is `OLD`, otherwise `NEW`.
pub fn function_sql(channel: &str) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$
DECLARE
    row_data json;
BEGIN
    IF TG_OP = 'DELETE' THEN
        row_data := row_to_json(OLD);
    ELSE
        row_data := row_to_json(NEW);
    END IF;

    PERFORM pg_notify(
        {channel},
        json_build_object(
            'table', TG_TABLE_NAME,
            'operation', TG_OP,
            'data', row_data,
            'timestamp', now()
        )::text
    );

    RETURN COALESCE(NEW, OLD);
END;
$$ LANGUAGE plpgsql"#,
        function = TRIGGER_FUNCTION,
        channel = quote_literal(channel),
    )
}

/// Name of the trigger attached to `table`.
pub fn trigger_name(table: &str) -> String {
    format!("{}_data_change", table)
}

/// Renders the statements attaching the trigger function to `table`.
pub fn attach_sql(table: &str) -> String {
    let trigger = quote_identifier(&trigger_name(table));
    let table = quote_identifier(table);
    format!(
        "DROP TRIGGER IF EXISTS {trigger} ON {table};\n\
         CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table} \
         FOR EACH ROW EXECUTE FUNCTION {function}()",
        trigger = trigger,
        table = table,
        function = TRIGGER_FUNCTION,
    )
}

/// Installs the trigger function and attaches it to every table in `tables`.
pub async fn install(client: &Client, channel: &str, tables: &[String]) -> Result<()> {
    client.batch_execute(&function_sql(channel)).await?;
    info!("Installed trigger function {}() for channel '{}'", TRIGGER_FUNCTION, channel);

    for table in tables {
        client.batch_execute(&attach_sql(table)).await?;
        info!("Attached change trigger to table {}", table);
    }

    Ok(())
}
