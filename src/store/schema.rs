//! Relational schema
//!
//! Table and column names are shared with the rest of the library pipeline
//! and must not change. Every statement is idempotent so `init` can run
//! against an already provisioned endpoint.

pub const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS libros (
    id                      BIGSERIAL PRIMARY KEY,
    codigo                  TEXT NOT NULL UNIQUE,
    ejemplares_disponibles  INTEGER NOT NULL DEFAULT 0 CHECK (ejemplares_disponibles >= 0),
    sede                    TEXT NOT NULL DEFAULT 'SEDE1',
    renovaciones_permitidas INTEGER NOT NULL DEFAULT 2,
    actualizado_en          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS prestamos (
    id           BIGSERIAL PRIMARY KEY,
    libro_id     BIGINT NOT NULL REFERENCES libros(id),
    usuario_id   INTEGER NOT NULL,
    sede         TEXT NOT NULL,
    fecha_inicio DATE NOT NULL,
    fecha_fin    DATE NOT NULL,
    renovaciones INTEGER NOT NULL DEFAULT 0,
    estado       TEXT NOT NULL DEFAULT 'ABIERTO'
);

CREATE INDEX IF NOT EXISTS prestamos_abiertos_idx
    ON prestamos (libro_id, fecha_inicio) WHERE estado = 'ABIERTO';

CREATE TABLE IF NOT EXISTS replication_queue (
    id             BIGSERIAL PRIMARY KEY,
    operation_type TEXT NOT NULL,
    libro_codigo   TEXT NOT NULL,
    payload        JSONB NOT NULL,
    target_db      TEXT NOT NULL,
    estado         TEXT NOT NULL DEFAULT 'PENDIENTE',
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    applied_at     TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS replication_queue_pendientes_idx
    ON replication_queue (id) WHERE estado = 'PENDIENTE';

CREATE TABLE IF NOT EXISTS replication_meta (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    active_db     TEXT NOT NULL,
    standby_db    TEXT NOT NULL,
    degraded_mode BOOLEAN NOT NULL DEFAULT FALSE,
    last_failover TIMESTAMPTZ
);
"#;
