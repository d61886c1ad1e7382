// THEORY:
// Danger zones are drawn once, by hand, on a reference frame of a view. Live
// streams rarely match that reference resolution, so zones are stored
// resolution-independent and projected onto each observed frame size.
//
// Key architectural principles:
// 1.  **Immutable template**: a `RegionSet` is what was loaded from disk, in
//     reference coordinates. It is never mutated after loading.
// 2.  **Per-worker projection cache**: a `RegionCache` belongs to exactly one
//     stream worker. It rescales the template at most once per distinct observed
//     resolution and then serves the cached projection.
// 3.  **Graceful degradation**: a missing or malformed annotation file is never
//     fatal. The caller falls back to an empty set, which simply means no frame
//     can be dangerous for that view.
//
// The annotation format is Pascal-VOC style XML. Only the handful of tags we
// need are read, with a small tag scanner rather than a full XML parser.

use crate::core_modules::view::ViewId;
use crate::error::RegionError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// An axis-aligned danger zone, inclusive pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl Region {
    pub const fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    /// Projects this region from `reference` resolution onto `observed` resolution,
    /// rounding half to even and clamping into the observed frame.
    pub fn rescale(&self, reference: (u32, u32), observed: (u32, u32)) -> Region {
        let (rw, rh) = reference;
        let (ow, oh) = observed;
        let project = |v: i32, from: u32, to: u32| -> i32 {
            let scaled = f64::from(v) * f64::from(to) / f64::from(from);
            clamp_coord(scaled.round_ties_even() as i64, to)
        };
        Region {
            xmin: project(self.xmin, rw, ow),
            ymin: project(self.ymin, rh, oh),
            xmax: project(self.xmax, rw, ow),
            ymax: project(self.ymax, rh, oh),
        }
    }

    /// Clamps this region into a `width` x `height` frame without scaling.
    pub fn clamp_to(&self, width: u32, height: u32) -> Region {
        Region {
            xmin: clamp_coord(i64::from(self.xmin), width),
            ymin: clamp_coord(i64::from(self.ymin), height),
            xmax: clamp_coord(i64::from(self.xmax), width),
            ymax: clamp_coord(i64::from(self.ymax), height),
        }
    }
}

fn clamp_coord(v: i64, dim: u32) -> i32 {
    let hi = i64::from(dim) - 1;
    v.min(hi).max(0) as i32
}

/// The danger zones of one view, in reference-resolution coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSet {
    view: ViewId,
    reference: Option<(u32, u32)>,
    regions: Vec<Region>,
}

impl RegionSet {
    pub fn new(view: ViewId, reference: Option<(u32, u32)>, regions: Vec<Region>) -> Self {
        Self {
            view,
            reference,
            regions,
        }
    }

    pub fn empty(view: ViewId) -> Self {
        Self::new(view, None, Vec::new())
    }

    pub fn view(&self) -> ViewId {
        self.view
    }

    /// The resolution the zones were drawn at, if the annotation declared one.
    pub fn reference(&self) -> Option<(u32, u32)> {
        self.reference
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Projects every zone onto a `width` x `height` frame, preserving order.
    ///
    /// Without a reference resolution the zones are only clamped.
    pub fn scaled_to(&self, width: u32, height: u32) -> Vec<Region> {
        match self.reference {
            Some(reference) => self
                .regions
                .iter()
                .map(|r| r.rescale(reference, (width, height)))
                .collect(),
            None => self.regions.iter().map(|r| r.clamp_to(width, height)).collect(),
        }
    }

    /// Reads a view's annotation file. Only objects named `zone_class` are kept.
    pub fn load(view: ViewId, path: &Path, zone_class: &str) -> Result<Self, RegionError> {
        if !path.exists() {
            return Err(RegionError::Missing(path.to_path_buf()));
        }
        let xml = std::fs::read_to_string(path)?;
        Self::parse_annotation(view, &xml, zone_class)
    }

    /// Parses a Pascal-VOC style annotation document.
    pub fn parse_annotation(view: ViewId, xml: &str, zone_class: &str) -> Result<Self, RegionError> {
        let reference = match element(xml, "size") {
            Some(size) => {
                let width = element(size, "width").map(parse_dimension).transpose()?;
                let height = element(size, "height").map(parse_dimension).transpose()?;
                match (width, height) {
                    (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
                    _ => None,
                }
            }
            None => None,
        };

        let mut regions = Vec::new();
        for object in elements(xml, "object") {
            let name = element(object, "name").map(str::trim).unwrap_or_default();
            if name != zone_class {
                continue;
            }
            let bndbox = element(object, "bndbox").ok_or_else(|| {
                RegionError::Malformed(format!("object '{name}' has no bndbox"))
            })?;
            regions.push(Region::new(
                coordinate(bndbox, "xmin")?,
                coordinate(bndbox, "ymin")?,
                coordinate(bndbox, "xmax")?,
                coordinate(bndbox, "ymax")?,
            ));
        }

        Ok(Self::new(view, reference, regions))
    }
}

fn parse_dimension(text: &str) -> Result<u32, RegionError> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| RegionError::Malformed(format!("invalid size value '{}'", text.trim())))?;
    if value < 0.0 {
        return Err(RegionError::Malformed(format!("negative size value {value}")));
    }
    Ok(value as u32)
}

/// Reads a bounding box coordinate. Fractional pixels are truncated toward zero.
fn coordinate(bndbox: &str, tag: &str) -> Result<i32, RegionError> {
    let text = element(bndbox, tag)
        .ok_or_else(|| RegionError::Malformed(format!("bndbox is missing <{tag}>")))?;
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| RegionError::Malformed(format!("invalid <{tag}> value '{}'", text.trim())))?;
    Ok(value.trunc() as i32)
}

/// Inner text of the first `<tag>` element.
fn element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    elements(xml, tag).into_iter().next()
}

/// Inner text of every non-nested `<tag>` element, in document order.
fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = xml[cursor..].find(&open) {
        let start = cursor + rel;
        let after_name = start + open.len();
        let Some(next) = xml[after_name..].chars().next() else {
            break;
        };
        // `<name>` must not match `<names>`.
        if !(next == '>' || next == '/' || next.is_whitespace()) {
            cursor = after_name;
            continue;
        }
        let Some(tag_end) = xml[after_name..].find('>') else {
            break;
        };
        let content_start = after_name + tag_end + 1;
        if xml[..content_start - 1].ends_with('/') {
            // Self-closing, no content.
            cursor = content_start;
            continue;
        }
        let Some(close_rel) = xml[content_start..].find(&close) else {
            break;
        };
        found.push(&xml[content_start..content_start + close_rel]);
        cursor = content_start + close_rel + close.len();
    }

    found
}

/// One worker's view of a `RegionSet`, projected per observed resolution.
#[derive(Debug)]
pub struct RegionCache {
    template: Arc<RegionSet>,
    scaled: HashMap<(u32, u32), Vec<Region>>,
}

impl RegionCache {
    pub fn new(template: Arc<RegionSet>) -> Self {
        Self {
            template,
            scaled: HashMap::new(),
        }
    }

    pub fn template(&self) -> &RegionSet {
        &self.template
    }

    /// Whether zones for this resolution are already projected.
    pub fn is_cached(&self, width: u32, height: u32) -> bool {
        self.scaled.contains_key(&(width, height))
    }

    /// Zones projected onto a `width` x `height` frame, rescaling on first sight.
    pub fn resolve(&mut self, width: u32, height: u32) -> &[Region] {
        let template = &self.template;
        self.scaled
            .entry((width, height))
            .or_insert_with(|| {
                tracing::debug!(
                    view = %template.view(),
                    width,
                    height,
                    zones = template.len(),
                    "projected danger zones onto new frame size"
                );
                template.scaled_to(width, height)
            })
            .as_slice()
    }

    /// How many distinct resolutions have been projected so far.
    pub fn rescale_count(&self) -> usize {
        self.scaled.len()
    }
}
