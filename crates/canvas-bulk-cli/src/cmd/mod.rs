pub mod bulk;
pub mod graphql;
pub mod list;
mod report;
