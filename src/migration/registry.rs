use std::sync::Arc;

use crate::{
    auth::password::{Argon2Hasher, PasswordHasher},
    db::Connection,
    migration::{
        migrations::CreateUsersTable,
        seeders::{AdminUserSeeder, TestUsersSeeder},
        Migrator,
    },
};

/// Every schema migration the application ships. Order of registration does
/// not matter; the runner sorts by version.
pub fn register_migrations(migrator: &mut Migrator) {
    migrator.add_migration(CreateUsersTable);
}

pub fn register_seeders(migrator: &mut Migrator, hasher: Arc<dyn PasswordHasher>) {
    migrator
        .add_seeder(AdminUserSeeder::new(hasher.clone()))
        .add_seeder(TestUsersSeeder::new(hasher));
}

/// A migrator with all shipped migrations and seeders registered.
pub fn migrator(conn: Connection) -> Migrator {
    let mut migrator = Migrator::new(conn);
    register_migrations(&mut migrator);
    register_seeders(&mut migrator, Arc::new(Argon2Hasher::default()));
    migrator
}
