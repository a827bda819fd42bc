use rusqlite::Connection;

/// Create every table. Audit logs share the main database so that mandatory
/// audit rows commit in the same transaction as the change they describe.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- SKU catalog (read-only for settlement)
        CREATE TABLE IF NOT EXISTS skus (
            sku TEXT PRIMARY KEY,
            benefit_code TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('credit_pack', 'report_unlock')),
            unit_qty INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        -- Orders (placed upstream, settled here)
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL DEFAULT 0,
            order_no TEXT NOT NULL,
            user_id TEXT,
            anon_id TEXT,
            sku TEXT NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 1,
            target_attempt_id TEXT,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            provider TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'created'
                CHECK (status IN ('created', 'paid', 'fulfilled', 'refunded')),
            external_trade_no TEXT,
            paid_at INTEGER,
            fulfilled_at INTEGER,
            refunded_at INTEGER,
            refund_amount_cents INTEGER,
            refund_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(org_id, order_no)
        );
        CREATE INDEX IF NOT EXISTS idx_orders_order_no ON orders(order_no);

        -- Payment events: one row per (provider, provider_event_id)
        CREATE TABLE IF NOT EXISTS payment_events (
            id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL DEFAULT 0,
            provider TEXT NOT NULL,
            provider_event_id TEXT NOT NULL,
            order_no TEXT NOT NULL,
            event_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'received',
            handle_status TEXT NOT NULL DEFAULT 'received',
            signature_ok INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 1,
            last_error_code TEXT,
            last_error_message TEXT,
            payload_json TEXT,
            payload_sha256 TEXT,
            payload_size_bytes INTEGER,
            payload_excerpt TEXT,
            received_at INTEGER NOT NULL,
            processed_at INTEGER,
            handled_at INTEGER,
            updated_at INTEGER NOT NULL,

            UNIQUE(provider, provider_event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_payment_events_order ON payment_events(order_no);

        -- Benefit grants: at most one per (org, benefit, scope, attempt)
        CREATE TABLE IF NOT EXISTS benefit_grants (
            id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL DEFAULT 0,
            user_id TEXT NOT NULL,
            benefit_ref TEXT NOT NULL,
            benefit_code TEXT NOT NULL,
            scope TEXT NOT NULL DEFAULT 'attempt',
            attempt_id TEXT NOT NULL,
            order_no TEXT,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'revoked')),
            meta_json TEXT,
            expires_at INTEGER,
            revoked_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_benefit_grants_unique
            ON benefit_grants(org_id, benefit_code, scope, attempt_id);
        CREATE INDEX IF NOT EXISTS idx_benefit_grants_order ON benefit_grants(order_no);

        -- Credit wallets
        CREATE TABLE IF NOT EXISTS benefit_wallets (
            id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL DEFAULT 0,
            benefit_code TEXT NOT NULL,
            balance INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,

            UNIQUE(org_id, benefit_code)
        );

        CREATE TABLE IF NOT EXISTS benefit_wallet_ledgers (
            id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL DEFAULT 0,
            benefit_code TEXT NOT NULL,
            delta INTEGER NOT NULL,
            reason TEXT NOT NULL CHECK (reason IN ('topup', 'reversal', 'consume')),
            order_no TEXT,
            attempt_id TEXT,
            idempotency_key TEXT NOT NULL,
            meta_json TEXT,
            created_at INTEGER NOT NULL,

            UNIQUE(org_id, benefit_code, idempotency_key)
        );

        -- Admin users and approvals
        CREATE TABLE IF NOT EXISTS admin_users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            permissions TEXT NOT NULL DEFAULT '',  -- comma separated
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS admin_approvals (
            id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL DEFAULT 0,
            type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'APPROVED', 'EXECUTING', 'EXECUTED', 'FAILED')),
            payload_json TEXT NOT NULL DEFAULT '{}',
            reason TEXT NOT NULL,
            correlation_id TEXT,
            requested_by TEXT,
            approved_by TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_code TEXT,
            error_message TEXT,
            executed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_admin_approvals_status ON admin_approvals(status);

        CREATE TABLE IF NOT EXISTS content_pack_releases (
            id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            region TEXT NOT NULL,
            locale TEXT NOT NULL,
            dir_alias TEXT NOT NULL,
            from_version_id TEXT,
            to_version_id TEXT,
            from_pack_id TEXT,
            to_pack_id TEXT,
            status TEXT NOT NULL,
            message TEXT,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Provider ingest identities
        CREATE TABLE IF NOT EXISTS idempotency_keys (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            external_id TEXT NOT NULL,
            recorded_at INTEGER NOT NULL,
            hash TEXT NOT NULL,
            ingest_batch_id TEXT,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,

            UNIQUE(provider, external_id, recorded_at)
        );
        CREATE INDEX IF NOT EXISTS idx_idempotency_keys_hash ON idempotency_keys(provider, hash);

        -- Budget counters (one row per period key)
        CREATE TABLE IF NOT EXISTS budget_counters (
            key TEXT PRIMARY KEY,
            tokens_in INTEGER NOT NULL DEFAULT 0,
            tokens_out INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            requests INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER NOT NULL
        );

        -- Lease locks
        CREATE TABLE IF NOT EXISTS locks (
            key TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );

        -- Background jobs
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            queue TEXT NOT NULL DEFAULT 'default',
            payload_json TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'running', 'done', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            available_at INTEGER NOT NULL,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, available_at);

        -- Audit trail
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            actor_type TEXT NOT NULL CHECK (actor_type IN ('admin', 'system', 'provider')),
            actor_id TEXT,
            org_id INTEGER NOT NULL DEFAULT 0,
            action TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            meta_json TEXT,
            ip TEXT,
            user_agent TEXT,
            request_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_target ON audit_logs(target_type, target_id);
        "#,
    )
}
