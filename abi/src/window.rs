//! Window handles, flags, states and hit-test zones.

use bitflags::bitflags;

/// Window handle. 0 is the reserved null handle; 1..=WM_MAX_WINDOWS index
/// slots in the window table (handle = slot index + 1).
pub type Hwnd = u8;

pub const HWND_NULL: Hwnd = 0;
pub const WM_MAX_WINDOWS: usize = 16;

/// Bytes reserved for a window title, including the implicit terminator.
pub const WINDOW_TITLE_LEN: usize = 24;

bitflags! {
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct WindowFlags: u16 {
        const ALIVE     = 1 << 0;
        const VISIBLE   = 1 << 1;
        const FOCUSED   = 1 << 2;
        const CLOSABLE  = 1 << 3;
        const RESIZABLE = 1 << 4;
        const MOVABLE   = 1 << 5;
        const BORDER    = 1 << 6;
        const DIRTY     = 1 << 7;
        const MENUBAR   = 1 << 8;
    }
}

impl WindowFlags {
    /// Style bits a caller may choose at creation time; the lifecycle
    /// bits (ALIVE/VISIBLE/FOCUSED/DIRTY) are owned by the manager.
    pub const STYLE_MASK: WindowFlags = WindowFlags::CLOSABLE
        .union(WindowFlags::RESIZABLE)
        .union(WindowFlags::MOVABLE)
        .union(WindowFlags::BORDER)
        .union(WindowFlags::MENUBAR);

    /// Standard overlapped window: title bar, border, all buttons.
    pub const STYLE_DEFAULT: WindowFlags = WindowFlags::CLOSABLE
        .union(WindowFlags::RESIZABLE)
        .union(WindowFlags::MOVABLE)
        .union(WindowFlags::BORDER);

    /// Dialog: closable and movable but fixed-size.
    pub const STYLE_DIALOG: WindowFlags = WindowFlags::CLOSABLE
        .union(WindowFlags::MOVABLE)
        .union(WindowFlags::BORDER);

    /// Borderless popup.
    pub const STYLE_POPUP: WindowFlags = WindowFlags::empty();
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WindowState {
    #[default]
    Normal = 0,
    Minimized = 1,
    Maximized = 2,
}

/// Result of decomposing a point against a window frame.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HitZone {
    Nowhere,
    Client,
    TitleBar,
    Close,
    Maximize,
    Minimize,
    MenuBar,
    BorderL,
    BorderR,
    BorderT,
    BorderB,
    BorderTL,
    BorderTR,
    BorderBL,
    BorderBR,
}

impl HitZone {
    #[inline]
    pub const fn is_border(self) -> bool {
        matches!(
            self,
            HitZone::BorderL
                | HitZone::BorderR
                | HitZone::BorderT
                | HitZone::BorderB
                | HitZone::BorderTL
                | HitZone::BorderTR
                | HitZone::BorderBL
                | HitZone::BorderBR
        )
    }
}
