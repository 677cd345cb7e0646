/// An sRGB colour with 8-bit alpha, parsed from the CSS forms the editor writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn is_transparent(self) -> bool {
        self.a == 0
    }

    /// Components in `0.0..=1.0`, as PDF colour operators take them.
    pub fn unit_rgb(self) -> (f32, f32, f32) {
        (
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
        )
    }

    pub fn alpha(self) -> f32 {
        f32::from(self.a) / 255.0
    }

    /// `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb()`, `rgba()`, `transparent` and a few names.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if let Some(hex) = value.strip_prefix('#') {
            return parse_hex(hex);
        }
        if let Some(args) = value
            .strip_prefix("rgba(")
            .or_else(|| value.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return parse_functional(args);
        }
        named(&value)
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut c = hex.chars().map(|ch| channel(&format!("{ch}{ch}")));
            Some(Color::rgb(c.next()??, c.next()??, c.next()??))
        }
        6 | 8 => {
            let a = if hex.len() == 8 { channel(&hex[6..8])? } else { 255 };
            Some(Color {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
                a,
            })
        }
        _ => None,
    }
}

fn parse_functional(args: &str) -> Option<Color> {
    let parts: Vec<&str> = args.split([',', ' ', '/']).filter(|p| !p.is_empty()).collect();
    if parts.len() < 3 {
        return None;
    }
    let channel = |s: &str| -> Option<u8> {
        match s.strip_suffix('%') {
            Some(pct) => Some((pct.parse::<f32>().ok()?.clamp(0.0, 100.0) * 2.55).round() as u8),
            None => Some(s.parse::<f32>().ok()?.round().clamp(0.0, 255.0) as u8),
        }
    };
    let a = match parts.get(3) {
        Some(s) => match s.strip_suffix('%') {
            Some(pct) => (pct.parse::<f32>().ok()?.clamp(0.0, 100.0) * 2.55).round() as u8,
            None => (s.parse::<f32>().ok()?.clamp(0.0, 1.0) * 255.0).round() as u8,
        },
        None => 255,
    };
    Some(Color {
        r: channel(parts[0])?,
        g: channel(parts[1])?,
        b: channel(parts[2])?,
        a,
    })
}

fn named(name: &str) -> Option<Color> {
    Some(match name {
        "transparent" => Color { r: 0, g: 0, b: 0, a: 0 },
        "black" => Color::BLACK,
        "white" => Color::WHITE,
        "red" => Color::rgb(255, 0, 0),
        "green" => Color::rgb(0, 128, 0),
        "blue" => Color::rgb(0, 0, 255),
        "gray" | "grey" => Color::rgb(128, 128, 128),
        "lightgray" | "lightgrey" => Color::rgb(211, 211, 211),
        "yellow" => Color::rgb(255, 255, 0),
        "orange" => Color::rgb(255, 165, 0),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_editor_colours() {
        assert_eq!(Color::parse("#e5e7eb"), Some(Color::rgb(0xe5, 0xe7, 0xeb)));
        assert_eq!(Color::parse("#fff"), Some(Color::WHITE));
        assert_eq!(Color::parse("rgba(0, 0, 0, 0.5)").map(|c| c.a), Some(128));
        assert!(Color::parse("transparent").is_some_and(Color::is_transparent));
        assert_eq!(Color::parse("#12"), None);
    }
}
