mod auto_backup;
mod backend;
mod backup;
mod data;
mod status;

// Backup / restore commands
pub use backup::{run_backup, run_restore};

// Status commands
pub use status::run_status;

// Backend commands
pub use backend::{run_login, run_set_backend, show_backend, show_login_link};

// Local data commands
pub use data::{run_delete, run_estimate, run_forget_changes, run_put};

// Auto backup commands
pub use auto_backup::{
    run_auto_backup_check, run_daemon, show_status as show_auto_backup_status, store_user_id,
};
