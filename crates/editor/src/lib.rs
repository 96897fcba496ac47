//! The editor side of the bridge.
//!
//! The protocol core never touches buffers or views directly; it talks
//! to an [`Editor`] implementation through two callback-shaped
//! capabilities: "create or update an editable surface" and "observe a
//! surface's local changes". [`MemoryEditor`] is the in-memory
//! implementation backing the standalone binary and the tests; a real
//! editor plugin supplies its own.

pub mod bridge;
pub mod memory;

pub use bridge::{ConnectOptions, SyncBridge};
pub use memory::{MemoryEditor, SyntaxMap};

use ghosttext_protocol::Selection;

/// Handle to an editor window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Handle to an editable surface (a buffer/view mirroring one browser
/// text box).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Handle to a change-observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

/// Callback invoked with the surface's text and selections after each
/// local edit.
pub type ChangeCallback = Box<dyn FnMut(&str, &[Selection]) + Send>;

/// The editor-side collaborator.
///
/// Implementations own all document/view management; the bridge only
/// pushes content in and observes edits coming out.
pub trait Editor: Send + Sync + 'static {
    /// `true` if a window exists to host editable surfaces.
    fn has_window(&self) -> bool;

    fn create_or_focus_window(&self) -> WindowHandle;

    /// Best-effort: failures are the editor's to log, not to
    /// propagate.
    fn run_named_command(&self, name: &str);

    fn create_editable_surface(&self, title: &str, text: &str) -> SurfaceHandle;

    /// Derive and apply a content-type/syntax hint from the page URL.
    /// The mapping policy is the editor's.
    fn set_surface_syntax_hint(&self, surface: SurfaceHandle, url: &str);

    fn replace_surface_content(&self, surface: SurfaceHandle, text: &str, selections: &[Selection]);

    fn observe_surface_changes(
        &self,
        surface: SurfaceHandle,
        callback: ChangeCallback,
    ) -> ObserverHandle;

    fn unobserve(&self, observer: ObserverHandle);
}
