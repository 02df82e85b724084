//! Window-manager event records and input constants.
//!
//! Events travel through a fixed ring shared across both cores, so the
//! record is kept small and `Copy`: one tag byte plus a payload of at
//! most ten bytes.

use bitflags::bitflags;

/// Capacity of the cross-core event ring.
pub const EVENT_QUEUE_SIZE: usize = 128;

bitflags! {
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct KeyMods: u8 {
        const SHIFT = 1 << 0;
        const CTRL  = 1 << 1;
        const ALT   = 1 << 2;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct MouseButtons: u8 {
        const LEFT  = 1 << 0;
        const RIGHT = 1 << 1;
    }
}

/// A window event. The discriminant is the on-wire type tag.
#[repr(C, u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WindowEvent {
    Null,
    Create,
    Destroy,
    Close,
    Paint,
    SetFocus,
    KillFocus,
    KeyDown { scancode: u8, mods: KeyMods },
    KeyUp { scancode: u8, mods: KeyMods },
    Char { ch: u8, mods: KeyMods },
    MouseMove { x: i16, y: i16, buttons: MouseButtons, mods: KeyMods },
    ButtonDown { x: i16, y: i16, buttons: MouseButtons, mods: KeyMods },
    ButtonUp { x: i16, y: i16, buttons: MouseButtons, mods: KeyMods },
    RButtonDown { x: i16, y: i16, buttons: MouseButtons, mods: KeyMods },
    RButtonUp { x: i16, y: i16, buttons: MouseButtons, mods: KeyMods },
    Move { x: i16, y: i16 },
    Size { w: i16, h: i16 },
    Command { id: u16 },
    Timer { id: u16 },
}

// The ring stores events by value; keep the record within the 12-byte
// wire budget.
const _: () = assert!(core::mem::size_of::<WindowEvent>() <= 12);

impl WindowEvent {
    /// True for the three mouse-button/move variants routed by hit-test.
    #[inline]
    pub const fn is_mouse(&self) -> bool {
        matches!(
            self,
            WindowEvent::MouseMove { .. }
                | WindowEvent::ButtonDown { .. }
                | WindowEvent::ButtonUp { .. }
                | WindowEvent::RButtonDown { .. }
                | WindowEvent::RButtonUp { .. }
        )
    }
}

/// PS/2 set-1 make codes for the keys the window manager itself reacts
/// to. Full keymaps live in the (external) keyboard driver.
pub mod scancode {
    pub const KEY_ESC: u8 = 0x01;
    pub const KEY_BACKSPACE: u8 = 0x0E;
    pub const KEY_TAB: u8 = 0x0F;
    pub const KEY_ENTER: u8 = 0x1C;
    pub const KEY_LCTRL: u8 = 0x1D;
    pub const KEY_LSHIFT: u8 = 0x2A;
    pub const KEY_RSHIFT: u8 = 0x36;
    pub const KEY_LALT: u8 = 0x38;
    pub const KEY_SPACE: u8 = 0x39;
    pub const KEY_F4: u8 = 0x3E;
    pub const KEY_UP: u8 = 0x48;
    pub const KEY_LEFT: u8 = 0x4B;
    pub const KEY_RIGHT: u8 = 0x4D;
    pub const KEY_DOWN: u8 = 0x50;
    pub const KEY_HOME: u8 = 0x47;
    pub const KEY_END: u8 = 0x4F;
    pub const KEY_DELETE: u8 = 0x53;
}
