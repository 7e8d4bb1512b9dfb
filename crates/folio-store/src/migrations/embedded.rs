//! Embedded SQL migrations
//!
//! The portfolio schema, compiled into the binary with include_str! so a
//! deploy needs no migrations directory next to it. Postgres dialect.

use crate::errors::Result;
use crate::migrations::source::{order_units, UnitSource};
use folio_core::MigrationUnit;

const EMBEDDED: &[(&str, &str)] = &[
    (
        "20240101000000_initial_setup",
        include_str!("../../migrations/20240101000000_initial_setup.sql"),
    ),
    (
        "20240115000000_create_portfolio_sections",
        include_str!("../../migrations/20240115000000_create_portfolio_sections.sql"),
    ),
    (
        "20240201000000_create_contact_messages",
        include_str!("../../migrations/20240201000000_create_contact_messages.sql"),
    ),
    (
        "20240301000000_create_images",
        include_str!("../../migrations/20240301000000_create_images.sql"),
    ),
    (
        "20240315000000_relax_profile_constraints",
        include_str!("../../migrations/20240315000000_relax_profile_constraints.sql"),
    ),
    (
        "20240320000000_index_images_by_profile",
        include_str!("../../migrations/20240320000000_index_images_by_profile.sql"),
    ),
];

/// The migrations shipped with the application
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSource;

impl UnitSource for EmbeddedSource {
    fn load(&self) -> Result<Vec<MigrationUnit>> {
        let units = EMBEDDED
            .iter()
            .map(|(name, sql)| MigrationUnit::new(*name, *sql))
            .collect::<Result<Vec<_>>>()?;
        order_units(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_list_is_declared_in_name_order() {
        assert!(
            EMBEDDED.windows(2).all(|pair| pair[0].0 < pair[1].0),
            "embedded list must be declared in strictly increasing name order"
        );
        assert_eq!(EmbeddedSource.load().unwrap().len(), EMBEDDED.len());
    }

    #[test]
    fn test_concurrent_index_unit_opts_out_of_transaction() {
        let units = EmbeddedSource.load().unwrap();
        let index = units
            .iter()
            .find(|u| u.name() == "20240320000000_index_images_by_profile")
            .unwrap();
        assert!(!index.is_transactional());
        assert!(units
            .iter()
            .filter(|u| u.name() != index.name())
            .all(|u| u.is_transactional()));
    }
}
