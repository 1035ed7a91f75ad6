use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Theme colour keys and their hex values, as offered by the admin colour picker.
pub const COLORS: &[(&str, &str)] = &[
    ("red", "f44336"),
    ("red-light", "e57373"),
    ("red-dark", "c62828"),
    ("pink", "e91e63"),
    ("pink-light", "f06292"),
    ("pink-dark", "ad1457"),
    ("purple", "9c27b0"),
    ("purple-light", "ba68c8"),
    ("purple-dark", "6a1b9a"),
    ("deep-purple", "673ab7"),
    ("deep-purple-light", "9575cd"),
    ("deep-purple-dark", "4527a0"),
    ("indigo", "3f51b5"),
    ("indigo-light", "7986cb"),
    ("indigo-dark", "283593"),
    ("blue", "2196f3"),
    ("blue-light", "64b5f6"),
    ("blue-dark", "1565c0"),
    ("light-blue", "03a9f4"),
    ("light-blue-light", "4fc3f7"),
    ("light-blue-dark", "0277bd"),
    ("cyan", "00bcd4"),
    ("cyan-light", "4dd0e1"),
    ("cyan-dark", "00838f"),
    ("teal", "009688"),
    ("teal-light", "4db6ac"),
    ("teal-dark", "00695c"),
    ("green", "4caf50"),
    ("green-light", "81c784"),
    ("green-dark", "2e7d32"),
    ("light-green", "8bc34a"),
    ("light-green-light", "aed581"),
    ("light-green-dark", "558b2f"),
    ("lime", "cddc39"),
    ("lime-light", "dce775"),
    ("lime-dark", "9e9d24"),
    ("yellow", "ffeb3b"),
    ("yellow-light", "fff176"),
    ("yellow-dark", "f9a825"),
    ("amber", "ffc107"),
    ("amber-light", "ffd54f"),
    ("amber-dark", "ff8f00"),
    ("orange", "ff9800"),
    ("orange-light", "ffb74d"),
    ("orange-dark", "ef6c00"),
    ("deep-orange", "ff5722"),
    ("deep-orange-light", "ff8a65"),
    ("deep-orange-dark", "d84315"),
];

/// Colour used when an asset's colour key cannot be resolved.
pub const DEFAULT_COLOR: &str = "ff8a80";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub name: String,
    pub url: String,
    pub length: f64,
    pub color: String,
}

/// An ordered batch of assets to play before the next sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetBlock {
    pub assets: Vec<Asset>,
    pub wait: f64,
}

impl Asset {
    pub fn new(name: impl Into<String>, url: impl Into<String>, length: f64, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            length,
            color: color.into(),
        }
    }

    /// Local filesystem location of the audio, if the url points at one.
    pub fn local_path(&self) -> Result<PathBuf> {
        let url = self.url.trim();
        if let Some(rest) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(rest));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(anyhow!("Remote asset url is not playable locally: {}", url));
        }
        if url.is_empty() {
            return Err(anyhow!("Asset '{}' has no url", self.name));
        }
        Ok(PathBuf::from(url))
    }

    /// Hex colour (without `#`) for this asset's colour key.
    pub fn hex_color(&self) -> String {
        resolve_color(&self.color).unwrap_or_else(|| DEFAULT_COLOR.to_string())
    }

    /// Wave and progress colours for the waveform display.
    pub fn waveform_colors(&self) -> (String, String) {
        let hex = format!("#{}", self.hex_color());
        (
            shade_color(&hex, -3).unwrap_or_else(|_| hex.clone()),
            shade_color(&hex, -22).unwrap_or(hex),
        )
    }
}

impl AssetBlock {
    pub fn new(assets: Vec<Asset>, wait: f64) -> Self {
        Self { assets, wait }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Asset> {
        self.assets.get(index)
    }

    /// Total playing time of every asset in the block, in seconds.
    pub fn total_length(&self) -> f64 {
        self.assets.iter().map(|a| a.length).sum()
    }

    /// Text listing of the block, marking `current` with an arrow.
    pub fn display_block(&self, current: Option<usize>) -> String {
        if self.assets.is_empty() {
            return format!("Block is empty (wait {})\n", format_duration(self.wait));
        }

        let mut output = String::new();
        output.push_str("Asset Block:\n");
        output.push_str("──────────────────────────────────────────────────\n");

        for (index, asset) in self.assets.iter().enumerate() {
            let marker = if current == Some(index) { "▶ " } else { "  " };
            output.push_str(&format!(
                "{} {:2}. {} [{}] ({})\n",
                marker,
                index + 1,
                asset.name,
                asset.hex_color(),
                format_duration(asset.length)
            ));
        }

        output.push_str(&"─".repeat(50));
        output.push('\n');
        output.push_str(&format!(
            "Total {} then wait {}\n",
            format_duration(self.total_length()),
            format_duration(self.wait)
        ));

        output
    }
}

/// Formats seconds as `minutes:seconds`, zero-padding the seconds.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Resolves a colour key to six hex digits.
///
/// Accepts a theme colour name from [`COLORS`], or a hex value with or without
/// a leading `#`.
pub fn resolve_color(key: &str) -> Option<String> {
    let key = key.trim();
    if let Some((_, hex)) = COLORS.iter().find(|(name, _)| name.eq_ignore_ascii_case(key)) {
        return Some(hex.to_string());
    }

    let hex = key.strip_prefix('#').unwrap_or(key);
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex.to_ascii_lowercase())
    } else {
        None
    }
}

/// Lightens (positive) or darkens (negative) a `#rrggbb` colour by a percentage.
pub fn shade_color(color: &str, percent: i32) -> Result<String> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(anyhow!("Invalid colour: {}", color));
    }

    let mut shaded = String::from("#");
    for i in 0..3 {
        let channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("Invalid colour: {}", color))?;
        let value = (channel as i32 * (100 + percent) / 100).clamp(0, 255);
        shaded.push_str(&format!("{:02x}", value));
    }

    Ok(shaded)
}
