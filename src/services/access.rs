//! Access-control decisions
//!
//! `can` is the single place where a request is allowed or denied. It is a
//! pure function of who is asking, what they want to do and which resource
//! they want to do it to. Controllers resolve the resource first, ask
//! `can`, and only then touch storage.
//!
//! Evaluation order:
//! 1. A suspended or inactive requester is denied everything.
//! 2. Anonymous requesters may only read public, published projects.
//! 3. Active admins and super-admins may do anything.
//! 4. Everyone else gets owner rules.

use crate::models::{Account, AccountRole, AccountStatus, ProjectStatus, ReadScope, Visibility};

/// The requester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Anonymous,
    Account {
        id: i64,
        role: AccountRole,
        status: AccountStatus,
    },
}

impl Subject {
    pub fn account_id(&self) -> Option<i64> {
        match self {
            Subject::Anonymous => None,
            Subject::Account { id, .. } => Some(*id),
        }
    }

    /// An admin-role account that currently holds the admin bypass
    pub fn is_active_admin(&self) -> bool {
        matches!(
            self,
            Subject::Account { role, status: AccountStatus::Active, .. } if role.is_admin()
        )
    }
}

impl From<&Account> for Subject {
    fn from(account: &Account) -> Self {
        Subject::Account {
            id: account.id,
            role: account.role,
            status: account.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

/// What the action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Project {
        owner_id: i64,
        visibility: Visibility,
        status: ProjectStatus,
    },
    /// A project that does not exist yet
    NewProject,
    Account {
        id: i64,
    },
    AdminPanel,
}

impl From<&crate::models::Project> for Resource {
    fn from(project: &crate::models::Project) -> Self {
        Resource::Project {
            owner_id: project.owner_id,
            visibility: project.visibility,
            status: project.status,
        }
    }
}

fn is_public_and_published(visibility: Visibility, status: ProjectStatus) -> bool {
    visibility == Visibility::Public && status == ProjectStatus::Published
}

/// Decide whether `subject` may perform `action` on `resource`.
pub fn can(subject: &Subject, action: Action, resource: &Resource) -> bool {
    let (id, role, status) = match *subject {
        Subject::Anonymous => {
            return matches!(
                (action, resource),
                (Action::Read, Resource::Project { visibility, status, .. })
                    if is_public_and_published(*visibility, *status)
            );
        }
        Subject::Account { id, role, status } => (id, role, status),
    };

    if status.is_locked() {
        return false;
    }

    if role.is_admin() && status == AccountStatus::Active {
        return true;
    }

    match (action, resource) {
        (Action::Read, Resource::Project { owner_id, visibility, status }) => {
            *owner_id == id || is_public_and_published(*visibility, *status)
        }
        (Action::Update | Action::Delete, Resource::Project { owner_id, .. }) => *owner_id == id,
        (Action::Create, Resource::NewProject) => true,
        (Action::Read | Action::Update, Resource::Account { id: target }) => *target == id,
        _ => false,
    }
}

/// Row-level restriction equivalent to `can(subject, Read, project)`,
/// for list queries that cannot check rows one by one.
pub fn read_scope(subject: &Subject) -> ReadScope {
    match *subject {
        Subject::Anonymous => ReadScope::PublicOnly,
        Subject::Account { status, .. } if status.is_locked() => ReadScope::Nothing,
        Subject::Account { .. } if subject.is_active_admin() => ReadScope::Everything,
        Subject::Account { id, .. } => ReadScope::PublicOrOwnedBy(id),
    }
}

/// Extra gate for admin operations on another account.
///
/// On top of `can(.., AdminPanel)`: nobody changes their own role or
/// status here, other admin-role accounts can only be managed by a
/// super-admin, and only a super-admin may change roles at all.
pub fn can_manage_account(actor: &Subject, target: &Account, changes_role: bool) -> bool {
    if !can(actor, Action::Update, &Resource::AdminPanel) {
        return false;
    }
    let Subject::Account { id, role, .. } = *actor else {
        return false;
    };
    if id == target.id {
        return false;
    }
    if role == AccountRole::SuperAdmin {
        return true;
    }
    !changes_role && !target.role.is_admin()
}
