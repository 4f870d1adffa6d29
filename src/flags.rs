//! Per-call option flags.
//!
//! The dispatcher copies the session-wide defaults and ORs in flags derived
//! from the envelope's `arguments` object, so each primitive receives one
//! immutable flag set for the duration of the call.

/// Named boolean options controlling primitive behavior.
///
/// No ordering between flags matters; each primitive reads the subset it
/// understands and ignores the rest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptionFlags {
    pub print_acl: bool,
    pub print_avu: bool,
    pub print_checksum: bool,
    pub calculate_checksum: bool,
    pub print_contents: bool,
    pub print_replicate: bool,
    pub print_size: bool,
    pub print_timestamp: bool,
    /// Copy object bytes straight to stdout instead of returning JSON.
    pub print_raw: bool,
    /// Save fetched objects to a local file named by the target.
    pub save_files: bool,
    pub recursive: bool,
    pub force: bool,
    pub search_collections: bool,
    pub search_objects: bool,
    /// Stream uploads through the connection instead of a bulk transfer.
    pub single_server: bool,
    pub add_avu: bool,
    pub remove_avu: bool,
    /// Flush stdout after every emitted response.
    pub flush: bool,
}
