use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// A device pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Rectangle in device pixels, `right`/`bottom` exclusive as in uiautomator dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Bounds {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Bounds {
    pub fn center(&self) -> Point {
        Point {
            x: self.left + self.width() / 2,
            y: self.top + self.height() / 2,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

impl FromStr for Bounds {
    type Err = String;

    /// Parses the uiautomator form `[left,top][right,bottom]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| format!("bounds not bracketed: {s:?}"))?;
        let (first, second) = inner
            .split_once("][")
            .ok_or_else(|| format!("bounds missing second corner: {s:?}"))?;

        let corner = |part: &str| -> Result<(u32, u32), String> {
            let (x, y) = part
                .split_once(',')
                .ok_or_else(|| format!("bad corner {part:?} in {s:?}"))?;
            let x = x.trim().parse::<u32>().map_err(|e| format!("{x}: {e}"))?;
            let y = y.trim().parse::<u32>().map_err(|e| format!("{y}: {e}"))?;
            Ok((x, y))
        };

        let (left, top) = corner(first)?;
        let (right, bottom) = corner(second)?;
        if right < left || bottom < top {
            return Err(format!("inverted bounds: {s:?}"));
        }

        Ok(Bounds {
            left,
            top,
            right,
            bottom,
        })
    }
}

/// An element discovered in a snapshot: a UI node from a dump, or a template
/// match in a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    /// Position in document order within its tree (0 for visual matches).
    pub index: usize,
    #[serde(skip)]
    pub parent: Option<usize>,
    #[serde(skip)]
    pub depth: usize,
    pub bounds: Bounds,
    pub class: String,
    pub text: Option<String>,
    pub description: Option<String>,
    pub clickable: bool,
    pub focusable: bool,
    pub focused: bool,
}

impl Element {
    pub fn center(&self) -> Point {
        self.bounds.center()
    }

    /// Non-empty trimmed text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bounds() {
        let b: Bounds = "[0,1470][1080,1626]".parse().unwrap();
        assert_eq!(
            b,
            Bounds {
                left: 0,
                top: 1470,
                right: 1080,
                bottom: 1626
            }
        );
        assert_eq!(b.center(), Point { x: 540, y: 1548 });
        assert_eq!(b.height(), 156);
    }

    #[test]
    fn test_center_near_u32_max() {
        let b: Bounds = "[3000000000,3000000000][4000000000,4000000000]".parse().unwrap();
        assert_eq!(
            b.center(),
            Point {
                x: 3_500_000_000,
                y: 3_500_000_000
            }
        );
        let point: Bounds = "[4294967295,0][4294967295,1]".parse().unwrap();
        assert_eq!(point.center(), Point { x: u32::MAX, y: 0 });
    }

    #[test]
    fn test_parse_bounds_rejects_garbage() {
        assert!("".parse::<Bounds>().is_err());
        assert!("[0,0]".parse::<Bounds>().is_err());
        assert!("[a,0][1,1]".parse::<Bounds>().is_err());
        assert!("[10,10][5,5]".parse::<Bounds>().is_err());
    }
}
