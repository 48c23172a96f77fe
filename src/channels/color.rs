//! Channel display colors.

use serde::Serialize;

use crate::error::MetadataError;

/// An RGB triple, either 0-255 or normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Color { r, g, b }
    }

    /// Split a packed integer: red in bits 16-23, green 8-15, blue 0-7.
    ///
    /// Higher bits (alpha, or the sign of a Java-style signed ARGB value)
    /// are ignored.
    pub fn from_packed_rgb(value: i64) -> Self {
        let value = value as u64;
        Color {
            r: ((value >> 16) & 0xFF) as f64,
            g: ((value >> 8) & 0xFF) as f64,
            b: (value & 0xFF) as f64,
        }
    }

    /// Parse `"r,g,b"`.
    pub fn parse_components(text: &str) -> Result<Self, MetadataError> {
        let invalid = |message: String| MetadataError::InvalidColor {
            value: text.to_string(),
            message,
        };

        let components = text
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(format!("component {:?}: {}", part.trim(), e)))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        match components.as_slice() {
            [r, g, b] if components.iter().all(|c| c.is_finite() && *c >= 0.0) => {
                Ok(Color::new(*r, *g, *b))
            }
            [_, _, _] => Err(invalid("components must be finite and non-negative".to_string())),
            other => Err(invalid(format!("expected 3 components, got {}", other.len()))),
        }
    }

    pub fn max_component(&self) -> f64 {
        self.r.max(self.g).max(self.b)
    }

    /// Scale 0-255 colors into [0, 1]; colors already there are unchanged.
    pub fn normalized(self) -> Self {
        if self.max_component() > 1.0 {
            Color {
                r: self.r / 255.0,
                g: self.g / 255.0,
                b: self.b / 255.0,
            }
        } else {
            self
        }
    }

    pub fn to_rgba(self, alpha: f64) -> [f64; 4] {
        [self.r, self.g, self.b, alpha]
    }
}
