use serde::{Deserialize, Serialize};

/// An authorization record on the access controller.
///
/// Keyfob numbers are not unique on the device, so several cards may share
/// one `number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub number: i64,
    pub name: String,
}

impl Card {
    /// Cards written by this service are named with a dash-stripped user
    /// identifier, which never contains a space. Anything else was entered
    /// by a human ("First Last") and is left alone unless its keyfob number
    /// is claimed by an authorized user.
    pub fn is_managed(&self) -> bool {
        !self.name.contains(' ')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_managed() {
        let card = |name: &str| Card {
            id: 1,
            number: 9001,
            name: name.to_string(),
        };

        assert!(card("592af5478f6842d88b814a5d233b7cce").is_managed());
        assert!(card("").is_managed());
        assert!(!card("any name").is_managed());
    }
}
