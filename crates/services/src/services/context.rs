use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Who is acting, for which tenant, and at what instant. Passed explicitly
/// into every engine call; nothing reads tenant or user from ambient state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub is_admin: bool,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    pub fn admin(tenant_id: Uuid, user_id: Option<Uuid>) -> Self {
        Self {
            tenant_id,
            user_id,
            employee_id: None,
            is_admin: true,
            now: Utc::now(),
        }
    }

    pub fn employee(tenant_id: Uuid, employee_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id: None,
            employee_id: Some(employee_id),
            is_admin: false,
            now: Utc::now(),
        }
    }

    /// Context for background runners acting on behalf of a tenant.
    pub fn system(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id: None,
            employee_id: None,
            is_admin: true,
            now: Utc::now(),
        }
    }

    /// Pins the clock, mostly for tests and catch-up runs.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}
