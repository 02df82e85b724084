use core::ffi::c_int;

use rookos_abi::{Point, Rect};
use rookos_lib::define_test_suite;
use rookos_video::framebuffer::get_pixel;
use rookos_video as video;

use crate::draw::{self, wd_begin, wd_end};
use crate::primitives::{client_fill_rect, client_set_pixel, fill_rect, rect, text_width};

pub fn test_fill_and_outline() -> c_int {
    video::clear(0);
    fill_rect(4, 4, 6, 3, 5);
    if get_pixel(4, 4) != 5 || get_pixel(9, 6) != 5 || get_pixel(10, 4) != 0 {
        return -1;
    }
    video::clear(0);
    rect(2, 2, 5, 4, 7);
    // Corners and edges set, interior untouched.
    if get_pixel(2, 2) != 7 || get_pixel(6, 5) != 7 || get_pixel(4, 3) != 0 {
        return -1;
    }
    0
}

pub fn test_draw_ctx_scope() -> c_int {
    if draw::current().is_some() {
        return -1;
    }
    wd_begin(Point::new(100, 50), Rect::new(100, 50, 20, 10));
    if draw::current().is_none() {
        return -1;
    }
    wd_end();
    if draw::current().is_some() {
        return -1;
    }
    0
}

pub fn test_client_primitives_translate_and_clip() -> c_int {
    video::clear(0);
    wd_begin(Point::new(100, 50), Rect::new(100, 50, 20, 10));
    client_set_pixel(0, 0, 3);
    client_set_pixel(19, 9, 4);
    client_set_pixel(20, 0, 5); // outside clip, dropped
    client_fill_rect(18, 8, 10, 10, 6); // clipped to the client rect
    wd_end();

    if get_pixel(100, 50) != 3 {
        return -1;
    }
    if get_pixel(120, 50) != 0 {
        return -1;
    }
    // The fill clipped to the client rect and overwrote (119, 59).
    if get_pixel(118, 58) != 6 || get_pixel(119, 59) != 6 || get_pixel(121, 59) != 0 {
        return -1;
    }
    // Outside a paint scope, client primitives are inert.
    client_set_pixel(0, 0, 9);
    if get_pixel(100, 50) != 3 {
        return -1;
    }
    0
}

pub fn test_text_width() -> c_int {
    if text_width("") != 0 || text_width("abcd") != 32 {
        return -1;
    }
    0
}

define_test_suite!(
    gfx,
    [
        test_fill_and_outline,
        test_draw_ctx_scope,
        test_client_primitives_translate_and_clip,
        test_text_width,
    ]
);
