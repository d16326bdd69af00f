// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for refcount.rs

#[cfg(test)]
mod tests {
    use super::super::*;

    fn tcp(name: &str) -> Owner {
        Owner::new(OwnerType::TcpCustomResource, "prod", name)
    }

    #[test]
    fn test_shared_resource_survives_first_owner() {
        let counter = RefCounter::new();
        counter.add_owner(tcp("a"), "tcpcr_prod_db");
        counter.add_owner(tcp("b"), "tcpcr_prod_db");

        assert!(counter.remove_owner(&tcp("a")).is_empty());
        assert!(counter.has_owners("tcpcr_prod_db"));

        assert_eq!(counter.remove_owner(&tcp("b")), vec!["tcpcr_prod_db".to_string()]);
        assert!(!counter.has_owners("tcpcr_prod_db"));
    }

    #[test]
    fn test_remove_single_resource() {
        let counter = RefCounter::new();
        counter.add_owner(tcp("a"), "tcpcr_prod_db");
        counter.add_owner(tcp("a"), "tcpcr_prod_cache");

        assert!(counter.remove_owner_for_cfg_resource(&tcp("a"), "tcpcr_prod_db"));
        assert_eq!(counter.resources(&tcp("a")), vec!["tcpcr_prod_cache".to_string()]);
        assert!(counter.has_owners("tcpcr_prod_cache"));
    }

    #[test]
    fn test_unknown_owner_and_resource() {
        let counter = RefCounter::new();
        assert!(counter.remove_owner(&tcp("ghost")).is_empty());
        assert!(counter.remove_owner_for_cfg_resource(&tcp("ghost"), "nothing"));
        assert!(!counter.has_owners("nothing"));
    }

    #[test]
    fn test_owners_by_type_and_clear() {
        let counter = RefCounter::new();
        counter.add_owner(tcp("a"), "tcpcr_prod_a");
        counter.add_owner(
            Owner::new(OwnerType::TcpServicesConfigMap, "default", "tcp-services"),
            "tcp-5432",
        );
        assert_eq!(counter.owners(OwnerType::TcpCustomResource), vec![tcp("a")]);

        let handle = counter.clone();
        handle.clear();
        assert!(!counter.has_owners("tcp-5432"));
        assert!(counter.owners(OwnerType::TcpServicesConfigMap).is_empty());
    }
}
