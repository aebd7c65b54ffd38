//! Database table definitions

/// SQL to create the transactions table
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    tx INTEGER PRIMARY KEY AUTOINCREMENT,
    committed_at TEXT NOT NULL
)
"#;

/// SQL to create the datoms table
///
/// `v` has no declared type so SQLite keeps each value's storage class;
/// the attribute's schema type decides how it is read back.
pub const CREATE_DATOMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS datoms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    e INTEGER NOT NULL,
    a TEXT NOT NULL,
    v,
    tx INTEGER NOT NULL REFERENCES transactions(tx),
    added INTEGER NOT NULL DEFAULT 1
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_datoms_e ON datoms(e)",
    "CREATE INDEX IF NOT EXISTS idx_datoms_av ON datoms(a, v)",
    "CREATE INDEX IF NOT EXISTS idx_datoms_tx ON datoms(tx)",
];

/// All table creation statements
pub fn all_table_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_TRANSACTIONS_TABLE, CREATE_DATOMS_TABLE];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
