use std::fmt::{self, Display, Formatter};

/// The root table holds exactly one tablet: the root tablet itself.
const ROOT_TABLE_ID: &str = "+r";
/// The system catalog table; every tablet of this table other than the root tablet is a
/// "metadata tablet".
const METADATA_TABLE_ID: &str = "!0";

/// The three fixed classes of tablet a [`Dispatcher`](crate::dispatcher::Dispatcher) routes
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabletKind {
    /// The single, unpartitionable tablet of the root table.
    Root,
    /// A tablet of the system catalog table, other than the root tablet.
    Metadata,
    /// Any ordinary user-table tablet.
    User,
}

/// Opaque key identifying one tablet: a table id plus the end row of the key range it owns.
/// `end_row = None` means the tablet's range extends to the end of the table.
///
/// `kind` is derived once from `table_id` at construction and cached, rather than recomputed on
/// every classification check on the write-hot path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabletId {
    table_id: String,
    end_row:  Option<Box<[u8]>>,
    kind:     TabletKind,
}

impl TabletId {
    #[must_use]
    pub fn new(table_id: impl Into<String>, end_row: Option<Box<[u8]>>) -> Self {
        let table_id = table_id.into();
        let kind = classify(&table_id);
        Self { table_id, end_row, kind }
    }

    /// The root tablet: the sole tablet of the root table.
    #[must_use]
    pub fn root() -> Self {
        Self::new(ROOT_TABLE_ID, None)
    }

    #[must_use]
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    #[must_use]
    pub fn end_row(&self) -> Option<&[u8]> {
        self.end_row.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> TabletKind {
        self.kind
    }
}

impl Display for TabletId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.end_row {
            Some(row) => write!(f, "{}<{}", self.table_id, String::from_utf8_lossy(row)),
            None      => write!(f, "{}<(inf)", self.table_id),
        }
    }
}

fn classify(table_id: &str) -> TabletKind {
    if table_id == ROOT_TABLE_ID {
        TabletKind::Root
    } else if table_id == METADATA_TABLE_ID {
        TabletKind::Metadata
    } else {
        TabletKind::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_table_is_root_kind() {
        assert_eq!(TabletId::root().kind(), TabletKind::Root);
    }

    #[test]
    fn metadata_table_is_metadata_kind() {
        let id = TabletId::new(METADATA_TABLE_ID, Some(b"row1".as_slice().into()));
        assert_eq!(id.kind(), TabletKind::Metadata);
    }

    #[test]
    fn other_tables_are_user_kind() {
        let id = TabletId::new("t1", None);
        assert_eq!(id.kind(), TabletKind::User);
    }

    #[test]
    fn equality_is_keyed_on_table_and_end_row() {
        let a = TabletId::new("t1", Some(b"m".as_slice().into()));
        let b = TabletId::new("t1", Some(b"m".as_slice().into()));
        let c = TabletId::new("t1", Some(b"n".as_slice().into()));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
