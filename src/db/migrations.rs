use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Users and listings (collaborator tables)

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    email TEXT NOT NULL,
    push_subscription TEXT,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX idx_users_email ON users(email);

CREATE TABLE offers (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    -- Denormalized active-promotion snapshot. Cache, not independent state:
    -- written only by promote_offer and the expiry sweep.
    promo_tier TEXT,
    promo_price_cents INTEGER,
    promo_start_at TEXT,
    promo_end_at TEXT,
    promo_active INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (owner_id) REFERENCES users(id)
);

CREATE INDEX idx_offers_owner ON offers(owner_id);
CREATE INDEX idx_offers_promo ON offers(promo_active, promo_end_at);

CREATE TABLE service_requests (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL,
    provider_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (customer_id) REFERENCES users(id),
    FOREIGN KEY (provider_id) REFERENCES users(id)
);
",
        ),
        M::up(
            "-- Migration 2: Messages

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    sender_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    body TEXT NOT NULL,
    conversation_key TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (sender_id) REFERENCES users(id),
    FOREIGN KEY (recipient_id) REFERENCES users(id)
);

CREATE INDEX idx_messages_pair ON messages(sender_id, recipient_id, created_at);
CREATE INDEX idx_messages_recipient_unread ON messages(recipient_id, read);
",
        ),
        M::up(
            "-- Migration 3: Notifications

CREATE TABLE notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    body TEXT NOT NULL,
    -- Polymorphic related-entity reference: both columns set or neither.
    related_kind TEXT,
    related_id TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id),
    CHECK ((related_kind IS NULL) = (related_id IS NULL))
);

CREATE INDEX idx_notifications_user ON notifications(user_id, created_at);
CREATE INDEX idx_notifications_user_unread ON notifications(user_id, read);
",
        ),
        M::up(
            "-- Migration 4: Promotion history (system of record for billing)

-- Last days-remaining value the owner was warned about; reset on promote.
-- Keeps the hourly sweep from repeating the same warning.
ALTER TABLE offers ADD COLUMN promo_warned_days INTEGER;

CREATE TABLE promotions (
    id TEXT PRIMARY KEY,
    offer_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    tier TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (offer_id) REFERENCES offers(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX idx_promotions_offer ON promotions(offer_id, end_at);
",
        ),
    ])
}
