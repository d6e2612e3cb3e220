use rusqlite::Connection;

pub mod tables {
    pub const SNAPSHOTS: &str = "snapshots";
    pub const PAYOUTS: &str = "payouts";

    pub const ALL_TABLES: &[&str] = &[SNAPSHOTS, PAYOUTS];
}

pub mod columns {
    pub const SNAPSHOT_ID: &str = "snapshot_id";
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const TAKEN_AT: &str = "taken_at";
    pub const BODY: &str = "body";

    pub const RECIPIENT: &str = "recipient";
    pub const AMOUNT: &str = "amount";
    pub const MEMO: &str = "memo";
    pub const PAID_AT: &str = "paid_at";
}

pub use columns::*;
pub use tables::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema_version INTEGER NOT NULL,
    taken_at INTEGER NOT NULL,
    body BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS payouts (
    recipient TEXT NOT NULL,
    amount INTEGER NOT NULL,
    memo TEXT NOT NULL,
    paid_at INTEGER NOT NULL
);
"#;

pub fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)
}
