pub mod request_context;
pub mod request_id;

pub use request_context::{require_admin, require_employee};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
