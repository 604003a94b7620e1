//! Gridstore SDK: schema-driven JSON CRUD endpoints for data-grid clients.

pub mod coerce;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod query;
pub mod record;
pub mod response;
pub mod routes;
pub mod schema;
pub mod serialize;
pub mod settings;
pub mod setter;
pub mod sql;
pub mod state;
pub mod store;
pub mod wire;

pub use error::{AppError, ConfigError};
pub use extractors::{Caller, CallerIdentity, HeaderIdentity, StaticIdentity};
pub use handlers::{CrudHandlerSet, ExtJsonHandlers};
pub use query::{QuerySpec, SortSpec};
pub use record::{FieldValue, FlatRecord, Record, RelatedRef};
pub use routes::{app, common_routes, record_routes, AppOptions, RequestTiming, StatusCheck};
pub use schema::{load_from_path, resolve, resolve_str, RecordType, Registry};
pub use settings::Settings;
pub use state::DispatchState;
pub use store::{ensure_database_exists, MemoryStore, PgRecordStore, RecordStore, StoreError, StoreTransaction};
