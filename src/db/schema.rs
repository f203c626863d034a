use rusqlite::Connection;

/// Initialize the licensing schema.
///
/// WAL lets readers proceed while one writer holds the lock taken by
/// `BEGIN IMMEDIATE`.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Licenses (one per purchase)
        -- valid_until NULL = never expires (lifetime plan or admin override)
        CREATE TABLE IF NOT EXISTS licenses (
            license_id TEXT PRIMARY KEY,
            activation_code TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            plan TEXT NOT NULL CHECK (plan IN ('monthly', 'yearly', 'lifetime')),
            device_limit INTEGER NOT NULL CHECK (device_limit > 0),
            issued_at INTEGER NOT NULL,
            valid_until INTEGER,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'suspended', 'revoked')),
            user_hint TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_email ON licenses(email COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(status);
        CREATE INDEX IF NOT EXISTS idx_licenses_issued ON licenses(issued_at DESC);

        -- Devices bound to a license. is_active = 0 means suspended; every row,
        -- suspended or not, occupies one slot of licenses.device_limit.
        CREATE TABLE IF NOT EXISTS device_activations (
            license_id TEXT NOT NULL REFERENCES licenses(license_id) ON DELETE CASCADE,
            device_id TEXT NOT NULL,
            device_name TEXT,
            ip_address TEXT,
            activated_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,

            UNIQUE(license_id, device_id)
        );
        CREATE INDEX IF NOT EXISTS idx_device_activations_license ON device_activations(license_id, is_active);

        -- Revocation state; a row exists iff licenses.status = 'revoked'
        CREATE TABLE IF NOT EXISTS revoked_licenses (
            license_id TEXT PRIMARY KEY REFERENCES licenses(license_id) ON DELETE CASCADE,
            reason TEXT NOT NULL,
            revoked_by TEXT,
            revoked_at INTEGER NOT NULL
        );

        -- Append-only audit trail
        CREATE TABLE IF NOT EXISTS activation_history (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(license_id) ON DELETE CASCADE,
            action TEXT NOT NULL CHECK (action IN ('activate', 'heartbeat', 'deactivate', 'renew', 'cancel', 'delete', 'revoke', 'suspend', 'restore')),
            device_id TEXT,
            ip_address TEXT,
            details TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activation_history_license ON activation_history(license_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_activation_history_action_time ON activation_history(action, created_at);
        "#,
    )?;
    Ok(())
}
