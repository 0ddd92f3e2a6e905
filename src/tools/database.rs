//! Database tools, registered when `ENABLE_DATABASE` is set
//!
//! Queries run through the database's own command line client inside the
//! sandbox.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::execution::run_command;
use super::{or_default, render_command, ToolGroup};
use crate::sandbox::{ExecOptions, SandboxClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgresql,
    Mysql,
}

impl DatabaseType {
    /// Client invocation running `query` against `connection`
    fn query_command(self, connection: &str, query: &str) -> String {
        let query = query.replace('"', "\\\"");
        match self {
            DatabaseType::Sqlite => format!("sqlite3 {connection} \"{query}\""),
            DatabaseType::Postgresql => format!("psql {connection} -c \"{query}\""),
            DatabaseType::Mysql => format!("mysql {connection} -e \"{query}\""),
        }
    }

    fn backup_command(self, source: &str, output_path: &str) -> String {
        match self {
            DatabaseType::Sqlite => format!("sqlite3 {source} '.backup {output_path}'"),
            DatabaseType::Postgresql => format!("pg_dump {source} > {output_path}"),
            DatabaseType::Mysql => format!("mysqldump {source} > {output_path}"),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ExecuteSqlParams {
    #[schemars(description = "Type of database")]
    pub database_type: DatabaseType,
    #[schemars(description = "Database connection string or file path for SQLite")]
    pub connection_string: String,
    #[schemars(description = "SQL query to execute")]
    pub query: String,
    #[serde(default = "default_true")]
    #[schemars(description = "Whether to fetch results (for SELECT queries)")]
    pub fetch: bool,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct BackupParams {
    #[schemars(description = "Type of database")]
    pub database_type: DatabaseType,
    #[schemars(description = "Source database path or connection")]
    pub source: String,
    #[schemars(description = "Path for backup file")]
    pub output_path: String,
}

pub fn group(sandbox: SandboxClient) -> ToolGroup {
    let (sql, backup) = (sandbox.clone(), sandbox);

    ToolGroup::new("database")
        .tool("execute_sql", "Execute SQL query on a database.", move |params: ExecuteSqlParams| {
            let sandbox = sql.clone();
            async move { execute_sql(&sandbox, params).await }
        })
        .tool("backup_database", "Create a backup of a database.", move |params: BackupParams| {
            let sandbox = backup.clone();
            async move { backup_database(&sandbox, params).await }
        })
}

/// Run a query; with `fetch` unset the output is discarded
pub async fn execute_sql(sandbox: &SandboxClient, params: ExecuteSqlParams) -> String {
    let command = params
        .database_type
        .query_command(&params.connection_string, &params.query);
    render_command(
        run_command(sandbox, &command, ExecOptions::with_timeout(60)).await,
        |result| {
            let output = if params.fetch {
                or_default(&result.stdout, "Query executed successfully")
            } else {
                "Query executed successfully"
            };
            format!("SQL Query Result:\n{output}")
        },
        "Query failed",
        "Error executing SQL",
    )
}

pub async fn backup_database(sandbox: &SandboxClient, params: BackupParams) -> String {
    let command = params
        .database_type
        .backup_command(&params.source, &params.output_path);
    render_command(
        run_command(sandbox, &command, ExecOptions::with_timeout(300)).await,
        |_| format!("Database backed up successfully to: {}", params.output_path),
        "Backup failed",
        "Error backing up database",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_quotes_are_escaped() {
        let command = DatabaseType::Sqlite.query_command("app.db", r#"SELECT "name" FROM users"#);
        assert_eq!(command, r#"sqlite3 app.db "SELECT \"name\" FROM users""#);
    }

    #[test]
    fn test_client_per_database() {
        assert!(DatabaseType::Postgresql.query_command("postgres://db", "SELECT 1").starts_with("psql postgres://db -c"));
        assert!(DatabaseType::Mysql.query_command("-u root", "SELECT 1").starts_with("mysql -u root -e"));
    }

    #[test]
    fn test_backup_commands() {
        assert_eq!(DatabaseType::Sqlite.backup_command("app.db", "bk.db"), "sqlite3 app.db '.backup bk.db'");
        assert_eq!(DatabaseType::Postgresql.backup_command("shop", "shop.sql"), "pg_dump shop > shop.sql");
    }

    #[test]
    fn test_unsupported_database_is_rejected() {
        let parsed = serde_json::from_value::<ExecuteSqlParams>(serde_json::json!({
            "database_type": "oracle",
            "connection_string": "x",
            "query": "SELECT 1"
        }));
        assert!(parsed.is_err());
    }
}
