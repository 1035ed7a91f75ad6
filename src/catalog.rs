use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::asset_block::{Asset, AssetBlock, DEFAULT_COLOR};

/// Selection rules shared by stop sets and assets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Airing {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub begin: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default = "default_weight", deserialize_with = "de_weight")]
    pub weight: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl Default for Airing {
    fn default() -> Self {
        Self {
            enabled: true,
            begin: None,
            end: None,
            weight: 1.0,
        }
    }
}

impl Airing {
    pub fn is_airing(&self, now: DateTime<Utc>) -> bool {
        self.begin.map_or(true, |begin| begin <= now) && self.end.map_or(true, |end| end >= now)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.is_airing(now)
    }

    /// Non-positive weights are treated as 1, same as the server does on save.
    pub fn effective_weight(&self) -> f64 {
        if self.weight > 0.0 && self.weight.is_finite() {
            self.weight
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopSet {
    pub id: u64,
    pub name: String,
    #[serde(flatten)]
    pub airing: Airing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rotator {
    pub id: u64,
    pub name: String,
    pub color: String,
}

/// Membership of a rotator in a stop set; link ids give the play order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopSetRotator {
    pub id: u64,
    pub stopset: u64,
    pub rotator: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogAsset {
    pub id: u64,
    pub name: String,
    /// Seconds.
    pub duration: f64,
    /// Server-relative media path, e.g. `assets/station-id.mp3`.
    pub audio: String,
    pub audio_size: u64,
    #[serde(default)]
    pub rotators: Vec<u64>,
    #[serde(flatten)]
    pub airing: Airing,
}

impl CatalogAsset {
    /// Where the audio lives once downloaded under `media_dir`.
    pub fn local_path(&self, media_dir: &Path) -> PathBuf {
        self.audio
            .split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(media_dir.to_path_buf(), |path, part| path.join(part))
    }
}

/// Body of the server's `export` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub media_url: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub objects: Vec<ExportObject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model")]
pub enum ExportObject {
    #[serde(rename = "tomato.asset")]
    Asset { pk: u64, fields: AssetFields },
    #[serde(rename = "tomato.rotator")]
    Rotator { pk: u64, fields: RotatorFields },
    #[serde(rename = "tomato.stopset")]
    StopSet { pk: u64, fields: StopSetFields },
    #[serde(rename = "tomato.stopsetrotator")]
    StopSetRotator { pk: u64, fields: StopSetRotatorFields },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetFields {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "de_duration")]
    pub duration: f64,
    pub audio: String,
    #[serde(default)]
    pub audio_size: u64,
    #[serde(default)]
    pub rotators: Vec<u64>,
    #[serde(flatten)]
    pub airing: Airing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotatorFields {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopSetFields {
    pub name: String,
    #[serde(flatten)]
    pub airing: Airing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopSetRotatorFields {
    pub stopset: u64,
    pub rotator: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

fn de_weight<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

/// Parses `[D ]HH:MM:SS[.ffffff]` or a plain number of seconds.
pub fn parse_duration(value: &str) -> Result<f64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Ok(seconds);
    }

    let (days, clock) = match value.split_once(' ') {
        Some((days, clock)) => (
            days.trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid duration: {}", value))?,
            clock.trim(),
        ),
        None => (0.0, value),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(anyhow!("Invalid duration: {}", value));
    }

    let mut seconds = 0.0;
    for part in parts {
        let n: f64 = part.parse().with_context(|| format!("Invalid duration: {}", value))?;
        seconds = seconds * 60.0 + n;
    }

    Ok(days * 86400.0 + seconds)
}

/// A stop set picked for airing together with its assets in play order.
#[derive(Debug, Clone, PartialEq)]
pub struct StopSetBlock {
    pub stopset: String,
    pub assets: Vec<Asset>,
}

impl StopSetBlock {
    pub fn total_length(&self) -> f64 {
        self.assets.iter().map(|a| a.length).sum()
    }

    pub fn into_asset_block(self, wait: f64) -> AssetBlock {
        AssetBlock::new(self.assets, wait)
    }
}

/// Everything the client knows about stop sets, rotators and assets as of the last sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub stopsets: Vec<StopSet>,
    pub rotators: Vec<Rotator>,
    pub links: Vec<StopSetRotator>,
    pub assets: Vec<CatalogAsset>,
}

impl Catalog {
    pub fn from_export(objects: Vec<ExportObject>) -> Self {
        let mut catalog = Catalog::default();
        let mut unknown = 0usize;

        for object in objects {
            match object {
                ExportObject::Asset { pk, fields } => catalog.assets.push(CatalogAsset {
                    id: pk,
                    name: fields.name,
                    duration: fields.duration,
                    audio: fields.audio,
                    audio_size: fields.audio_size,
                    rotators: fields.rotators,
                    airing: fields.airing,
                }),
                ExportObject::Rotator { pk, fields } => catalog.rotators.push(Rotator {
                    id: pk,
                    name: fields.name,
                    color: fields.color,
                }),
                ExportObject::StopSet { pk, fields } => catalog.stopsets.push(StopSet {
                    id: pk,
                    name: fields.name,
                    airing: fields.airing,
                }),
                ExportObject::StopSetRotator { pk, fields } => catalog.links.push(StopSetRotator {
                    id: pk,
                    stopset: fields.stopset,
                    rotator: fields.rotator,
                }),
                ExportObject::Unknown => unknown += 1,
            }
        }

        if unknown > 0 {
            debug!("Ignored {} export objects of unknown models", unknown);
        }
        catalog.links.sort_by_key(|link| link.id);

        info!(
            "Catalog: {} stop sets, {} rotators, {} assets",
            catalog.stopsets.len(),
            catalog.rotators.len(),
            catalog.assets.len()
        );
        catalog
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog file: {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create catalog directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize catalog")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write catalog file: {}", path.display()))
    }

    pub fn is_empty(&self) -> bool {
        self.stopsets.is_empty() && self.assets.is_empty()
    }

    fn rotator_block(&self, stopset: u64) -> Vec<u64> {
        self.links
            .iter()
            .filter(|link| link.stopset == stopset)
            .map(|link| link.rotator)
            .collect()
    }

    /// Picks a stop set by weight and one asset per rotator slot.
    ///
    /// An asset picked for one slot is not eligible again for the rest of the
    /// block, even when it belongs to several rotators. Returns `None` when no
    /// enabled, currently airing stop set has rotators.
    pub fn generate_asset_block<R: Rng + ?Sized>(
        &self,
        now: DateTime<Utc>,
        rng: &mut R,
        media_dir: &Path,
    ) -> Option<StopSetBlock> {
        let stopsets: Vec<&StopSet> = self
            .stopsets
            .iter()
            .filter(|s| s.airing.is_eligible(now) && !self.rotator_block(s.id).is_empty())
            .collect();

        let stopset = match stopsets.choose_weighted(rng, |s| s.airing.effective_weight()) {
            Ok(stopset) => *stopset,
            Err(_) => return None,
        };
        let rotators = self.rotator_block(stopset.id);

        let mut pools: HashMap<u64, Vec<&CatalogAsset>> = HashMap::new();
        for rotator in &rotators {
            pools.entry(*rotator).or_insert_with(|| {
                self.assets
                    .iter()
                    .filter(|a| a.rotators.contains(rotator) && a.airing.is_eligible(now))
                    .collect()
            });
        }

        let mut assets = Vec::new();
        for rotator_id in rotators {
            let picked = pools
                .get(&rotator_id)
                .and_then(|pool| pool.choose_weighted(rng, |a| a.airing.effective_weight()).ok())
                .copied();

            let Some(asset) = picked else {
                warn!("Stop set '{}': rotator {} has no eligible assets", stopset.name, rotator_id);
                continue;
            };

            for pool in pools.values_mut() {
                pool.retain(|a| a.id != asset.id);
            }

            let color = self
                .rotators
                .iter()
                .find(|r| r.id == rotator_id)
                .map(|r| r.color.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_COLOR.to_string());

            assets.push(Asset::new(
                asset.name.clone(),
                asset.local_path(media_dir).to_string_lossy().to_string(),
                asset.duration,
                color,
            ));
        }

        debug!("Generated block from '{}' with {} assets", stopset.name, assets.len());
        Some(StopSetBlock {
            stopset: stopset.name.clone(),
            assets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn export_fixture() -> Value {
        json!({
            "media_url": "https://radio.example.org/media/",
            "config": {"wait_interval_minutes": 15},
            "objects": [
                {"model": "tomato.rotator", "pk": 1, "fields": {"name": "IDs", "color": "ff8a80"}},
                {"model": "tomato.rotator", "pk": 2, "fields": {"name": "Promos", "color": "82b1ff"}},
                {"model": "tomato.stopset", "pk": 10, "fields": {
                    "name": "Top of hour", "enabled": true, "begin": null, "end": null, "weight": "1.00"}},
                {"model": "tomato.stopsetrotator", "pk": 101, "fields": {"stopset": 10, "rotator": 2}},
                {"model": "tomato.stopsetrotator", "pk": 100, "fields": {"stopset": 10, "rotator": 1}},
                {"model": "tomato.asset", "pk": 1000, "fields": {
                    "name": "Station ID", "duration": "00:00:30", "audio": "assets/id.mp3",
                    "audio_size": 4000, "rotators": [1], "enabled": true, "weight": "2.50"}},
                {"model": "tomato.asset", "pk": 1001, "fields": {
                    "name": "Fund drive", "duration": 45.5, "audio": "assets/promo.mp3",
                    "audio_size": 6000, "rotators": [2]}},
                {"model": "auth.user", "pk": 1, "fields": {"username": "admin"}}
            ]
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_export() {
        let export: ExportResponse = serde_json::from_value(export_fixture()).unwrap();
        assert_eq!(export.media_url, "https://radio.example.org/media/");
        assert_eq!(export.config.get("wait_interval_minutes"), Some(&json!(15)));

        let catalog = Catalog::from_export(export.objects);
        assert_eq!(catalog.rotators.len(), 2);
        assert_eq!(catalog.stopsets.len(), 1);
        assert_eq!(catalog.assets.len(), 2);
        assert_eq!(catalog.links.iter().map(|l| l.id).collect::<Vec<_>>(), vec![100, 101]);

        let id = &catalog.assets[0];
        assert_eq!(id.duration, 30.0);
        assert_eq!(id.airing.weight, 2.5);
        assert!(catalog.assets[1].airing.enabled);
        assert_eq!(catalog.assets[1].airing.weight, 1.0);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("00:02:05").unwrap(), 125.0);
        assert_eq!(parse_duration("01:00:00.5").unwrap(), 3600.5);
        assert_eq!(parse_duration("1 00:00:01").unwrap(), 86401.0);
        assert_eq!(parse_duration("2:05").unwrap(), 125.0);
        assert_eq!(parse_duration("42.25").unwrap(), 42.25);
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("1:2:3:4").is_err());
    }

    #[test]
    fn test_airing_window() {
        let airing = Airing {
            begin: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()),
            ..Airing::default()
        };
        assert!(airing.is_eligible(now()));
        assert!(!airing.is_eligible(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));

        let disabled = Airing { enabled: false, ..Airing::default() };
        assert!(!disabled.is_eligible(now()));

        let zero = Airing { weight: 0.0, ..Airing::default() };
        assert_eq!(zero.effective_weight(), 1.0);
    }

    #[test]
    fn test_generate_block_follows_link_order() {
        let export: ExportResponse = serde_json::from_value(export_fixture()).unwrap();
        let catalog = Catalog::from_export(export.objects);
        let mut rng = StdRng::seed_from_u64(7);

        let block = catalog
            .generate_asset_block(now(), &mut rng, Path::new("/media"))
            .expect("block");

        assert_eq!(block.stopset, "Top of hour");
        let names: Vec<&str> = block.assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Station ID", "Fund drive"]);
        assert_eq!(block.assets[0].color, "ff8a80");
        assert_eq!(block.assets[1].color, "82b1ff");
        assert_eq!(block.assets[0].url, Path::new("/media/assets/id.mp3").to_string_lossy());
        assert_eq!(block.total_length(), 75.5);
    }

    #[test]
    fn test_generate_block_never_repeats_asset() {
        let mut catalog = Catalog::default();
        catalog.stopsets.push(StopSet { id: 1, name: "Twice".into(), airing: Airing::default() });
        catalog.rotators.push(Rotator { id: 5, name: "IDs".into(), color: "red".into() });
        catalog.links.push(StopSetRotator { id: 1, stopset: 1, rotator: 5 });
        catalog.links.push(StopSetRotator { id: 2, stopset: 1, rotator: 5 });
        catalog.links.push(StopSetRotator { id: 3, stopset: 1, rotator: 5 });
        for id in 0..2 {
            catalog.assets.push(CatalogAsset {
                id,
                name: format!("ID {}", id),
                duration: 10.0,
                audio: format!("assets/{}.mp3", id),
                audio_size: 1,
                rotators: vec![5],
                airing: Airing::default(),
            });
        }

        let mut rng = StdRng::seed_from_u64(1);
        let block = catalog.generate_asset_block(now(), &mut rng, Path::new("m")).unwrap();

        // Third slot has nothing left to pick from.
        assert_eq!(block.assets.len(), 2);
        assert_ne!(block.assets[0].name, block.assets[1].name);
    }

    #[test]
    fn test_generate_block_without_eligible_stopsets() {
        let mut catalog = Catalog::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(catalog.generate_asset_block(now(), &mut rng, Path::new("m")).is_none());

        catalog.stopsets.push(StopSet { id: 1, name: "No rotators".into(), airing: Airing::default() });
        assert!(catalog.generate_asset_block(now(), &mut rng, Path::new("m")).is_none());
    }

    #[test]
    fn test_local_path_stays_in_media_dir() {
        let asset = CatalogAsset {
            id: 1,
            name: "x".into(),
            duration: 1.0,
            audio: "../../etc/passwd".into(),
            audio_size: 1,
            rotators: vec![],
            airing: Airing::default(),
        };
        assert_eq!(asset.local_path(Path::new("/m")), PathBuf::from("/m/etc/passwd"));
    }

    #[test]
    fn test_catalog_save_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("catalog.json");

        assert!(Catalog::load(&path)?.is_empty());

        let export: ExportResponse = serde_json::from_value(export_fixture())?;
        let catalog = Catalog::from_export(export.objects);
        catalog.save(&path)?;
        assert_eq!(Catalog::load(&path)?, catalog);
        Ok(())
    }
}
