//! SQL storage through Sea-ORM.
//!
//! [`SqlRepository`] maps a [`Schema`](crate::schema::Schema) onto a table it does not own:
//! creating and migrating the table is left to the application.

mod sql;
mod statements;

pub use sql::SqlRepository;
