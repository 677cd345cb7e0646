//! Physical page geometry and the coordinate space floating objects live in.
//!
//! Floating objects are stored in CSS pixels (96 per inch) relative to the
//! top-left corner of the printable box, i.e. the page area inside the margin.
//! Zoom and scroll only exist in [`Viewport`]; nothing stored depends on them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const A4_SHORT_MM: f32 = 210.0;
pub const A4_LONG_MM: f32 = 297.0;
pub const MM_PER_INCH: f32 = 25.4;
pub const CSS_DPI: f32 = 96.0;
pub const PT_PER_INCH: f32 = 72.0;
pub const MAX_MARGIN_MM: f32 = 50.0;
pub const DEFAULT_MARGIN_MM: f32 = 20.0;

pub fn mm_to_px(mm: f32) -> f32 {
    mm * CSS_DPI / MM_PER_INCH
}

pub fn px_to_mm(px: f32) -> f32 {
    px * MM_PER_INCH / CSS_DPI
}

pub fn mm_to_pt(mm: f32) -> f32 {
    mm * PT_PER_INCH / MM_PER_INCH
}

pub fn px_to_pt(px: f32) -> f32 {
    px * PT_PER_INCH / CSS_DPI
}

/// Clamp a margin into `[0, 50]` mm. Non-finite input gets the default margin.
pub fn clamp_margin(mm: f32) -> f32 {
    if !mm.is_finite() {
        return DEFAULT_MARGIN_MM;
    }
    mm.clamp(0.0, MAX_MARGIN_MM)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn page_size_mm(self) -> SizeMm {
        match self {
            Orientation::Portrait => SizeMm {
                width: A4_SHORT_MM,
                height: A4_LONG_MM,
            },
            Orientation::Landscape => SizeMm {
                width: A4_LONG_MM,
                height: A4_SHORT_MM,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }
}

impl FromStr for Orientation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            _ => Err(Error::UnknownOrientation(s.to_string())),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SizeMm {
    pub width: f32,
    pub height: f32,
}

/// Axis-aligned box in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageGeometry {
    pub orientation: Orientation,
    pub margin_mm: f32,
}

impl PageGeometry {
    pub fn new(orientation: Orientation, margin_mm: f32) -> Self {
        Self {
            orientation,
            margin_mm: clamp_margin(margin_mm),
        }
    }

    pub fn page_mm(&self) -> SizeMm {
        self.orientation.page_size_mm()
    }

    pub fn printable_mm(&self) -> SizeMm {
        let page = self.page_mm();
        SizeMm {
            width: page.width - 2.0 * self.margin_mm,
            height: page.height - 2.0 * self.margin_mm,
        }
    }

    /// The whole page at 96 DPI, origin at the page corner.
    pub fn page_px(&self) -> PixelBox {
        let page = self.page_mm();
        PixelBox {
            x: 0.0,
            y: 0.0,
            width: mm_to_px(page.width),
            height: mm_to_px(page.height),
        }
    }

    /// The printable box at 96 DPI, positioned inside the page box.
    pub fn printable_px(&self) -> PixelBox {
        let printable = self.printable_mm();
        let margin = mm_to_px(self.margin_mm);
        PixelBox {
            x: margin,
            y: margin,
            width: mm_to_px(printable.width),
            height: mm_to_px(printable.height),
        }
    }

    /// Page size in PDF points.
    pub fn page_pt(&self) -> (f32, f32) {
        let page = self.page_mm();
        (mm_to_pt(page.width), mm_to_pt(page.height))
    }

    /// Page size in device pixels for a raster at `dpi`.
    pub fn page_device_px(&self, dpi: f32) -> (u32, u32) {
        let page = self.page_mm();
        let scale = dpi / MM_PER_INCH;
        (
            (page.width * scale).round().max(1.0) as u32,
            (page.height * scale).round().max(1.0) as u32,
        )
    }
}

/// Screen-space view of the page: where the printable box's origin sits on
/// screen and the current zoom factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub origin_x: f32,
    pub origin_y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    pub fn to_page(&self, screen_x: f32, screen_y: f32) -> (f32, f32) {
        let zoom = if self.zoom > 0.0 { self.zoom } else { 1.0 };
        (
            (screen_x - self.origin_x) / zoom,
            (screen_y - self.origin_y) / zoom,
        )
    }

    pub fn to_screen(&self, page_x: f32, page_y: f32) -> (f32, f32) {
        (
            page_x * self.zoom + self.origin_x,
            page_y * self.zoom + self.origin_y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_swaps_a4_sides() {
        let portrait = PageGeometry::new(Orientation::Portrait, 20.0);
        assert_eq!(portrait.page_mm(), SizeMm { width: 210.0, height: 297.0 });
        assert_eq!(portrait.printable_mm(), SizeMm { width: 170.0, height: 257.0 });

        let landscape = PageGeometry::new(Orientation::Landscape, 0.0);
        assert_eq!(landscape.page_device_px(72.0), (842, 595));
        assert_eq!("Landscape ".parse::<Orientation>().ok(), Some(Orientation::Landscape));
        assert!(matches!(
            "diagonal".parse::<Orientation>(),
            Err(Error::UnknownOrientation(_))
        ));
    }

    #[test]
    fn margins_are_clamped_not_wrapped() {
        assert_eq!(clamp_margin(-5.0), 0.0);
        assert_eq!(clamp_margin(80.0), MAX_MARGIN_MM);
        assert_eq!(clamp_margin(f32::NAN), DEFAULT_MARGIN_MM);
        assert_eq!(PageGeometry::new(Orientation::Portrait, 999.0).margin_mm, 50.0);
    }

    #[test]
    fn printable_box_starts_inside_the_margin() {
        let geometry = PageGeometry::new(Orientation::Portrait, 25.4);
        let printable = geometry.printable_px();
        assert!((printable.x - CSS_DPI).abs() < 1e-3);
        assert!((geometry.page_px().width - 210.0 / MM_PER_INCH * CSS_DPI).abs() < 1e-3);
    }

    #[test]
    fn zoom_does_not_change_page_coordinates() {
        let viewport = Viewport {
            origin_x: 10.0,
            origin_y: 20.0,
            zoom: 2.0,
        };
        assert_eq!(viewport.to_page(110.0, 220.0), (50.0, 100.0));
        assert_eq!(viewport.to_screen(50.0, 100.0), (110.0, 220.0));
    }
}
