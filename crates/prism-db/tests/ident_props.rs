// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used)]
//! Identifier stability across stores and encodings.

use std::collections::HashMap;

use prism_db::{hash, Database, Id};
use proptest::prelude::*;

proptest! {
    #[test]
    fn equal_values_share_an_identifier(s in ".{0,64}") {
        let db = Database::new();
        let a = db.store(s.clone()).unwrap();
        let b = db.store(s.clone()).unwrap();
        prop_assert_eq!(a, b);
        prop_assert_eq!(a, hash(&s).unwrap());
        prop_assert_eq!(db.len(), 1);
    }

    #[test]
    fn distinct_byte_strings_have_distinct_identifiers(
        a in prop::collection::vec(any::<u8>(), 0..64),
        b in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn map_identifiers_ignore_insertion_order(
        entries in prop::collection::btree_map(any::<u32>(), ".{0,8}", 0..16),
    ) {
        let forward: HashMap<u32, String> = entries.clone().into_iter().collect();
        let mut reversed = HashMap::with_capacity(1);
        for (k, v) in entries.into_iter().rev() {
            reversed.insert(k, v);
        }
        prop_assert_eq!(
            prism_db::canon::hash(&forward).unwrap(),
            prism_db::canon::hash(&reversed).unwrap()
        );
    }

    #[test]
    fn identifiers_round_trip_through_hex(bytes in prop::array::uniform20(any::<u8>())) {
        let id = Id(bytes);
        let parsed: Id = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }
}
