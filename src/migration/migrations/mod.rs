mod create_users_table;

pub use create_users_table::CreateUsersTable;
