//! Client-area draw context.
//!
//! The compositor brackets each window's paint callback with
//! `wd_begin`/`wd_end`; between the two, the client-relative primitives
//! translate through the recorded origin and clip against the client
//! rectangle. Painting happens only on the compositor task, so one
//! context slot is enough.

use rookos_abi::{Point, Rect};
use rookos_lib::StateCell;

#[derive(Copy, Clone, Debug, Default)]
pub struct DrawCtx {
    /// Screen coordinates of the client area's upper-left corner.
    pub origin: Point,
    /// Clip rectangle in screen coordinates.
    pub clip: Rect,
}

static CURRENT: StateCell<Option<DrawCtx>> = StateCell::new(None);

/// Enter a client paint scope.
pub fn wd_begin(origin: Point, clip: Rect) {
    CURRENT.with_mut(|c| *c = Some(DrawCtx { origin, clip }));
}

pub fn wd_end() {
    CURRENT.with_mut(|c| *c = None);
}

pub fn current() -> Option<DrawCtx> {
    CURRENT.with(|c| *c)
}
