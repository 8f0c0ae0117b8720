//! Types associated with the `org.freedesktop.DBus` interface.

/// Well known destination name.
pub const DESTINATION: &str = "org.freedesktop.DBus";

/// Well known interface name.
pub const INTERFACE: &str = "org.freedesktop.DBus";

/// Well known D-Bus path.
pub const PATH: &str = "/org/freedesktop/DBus";

raw_set! {
    /// The flags to a `RequestName` call.
    #[repr(u32)]
    pub enum NameFlag {
        /// If an application A specifies this flag and succeeds in becoming
        /// the owner of the name, and another application B later calls
        /// `RequestName` with the `REPLACE_EXISTING` flag, then application A
        /// will lose ownership and receive a `org.freedesktop.DBus.NameLost`
        /// signal, and application B will become the new owner.
        ALLOW_REPLACEMENT = 1,
        /// Try to replace the current owner if there is one. If this flag is
        /// not set the application will only become the owner of the name if
        /// there is no current owner.
        REPLACE_EXISTING = 2,
        /// Without this flag, if an application requests a name that is
        /// already owned, the application will be placed in a queue to own
        /// the name when the current owner gives it up. If this flag is
        /// given, the request simply fails instead.
        DO_NOT_QUEUE = 4,
    }
}

raw_enum! {
    /// The reply to a `RequestName` call.
    #[repr(u32)]
    pub enum NameReply {
        /// The caller is now the primary owner of the name, replacing any
        /// previous owner.
        PRIMARY_OWNER = 1,
        /// The name already had an owner and the caller has been placed in
        /// the queue for it.
        IN_QUEUE = 2,
        /// The name already has an owner and [`NameFlag::DO_NOT_QUEUE`] was
        /// specified.
        EXISTS = 3,
        /// The application trying to request ownership of a name is already
        /// the owner of it.
        ALREADY_OWNER = 4,
    }
}
