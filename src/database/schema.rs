// Database schema definitions and migrations
// This module contains the SQL schema for the audit ledger database

pub const LEDGER_ENTRIES_SCHEMA: &str = include_str!("../../migrations/001_ledger_entries.sql");

/// Migrations in the order they are applied
pub const MIGRATIONS: &[(&str, &str)] = &[("001_ledger_entries", LEDGER_ENTRIES_SCHEMA)];
