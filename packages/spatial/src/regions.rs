//! Point-in-polygon region classification.
//!
//! Maintains the fixed list of named regions the system covers, each with an
//! optional polygon boundary and a list of known suburb names. Boundaries are
//! held in an R-tree so a point lookup only runs the exact containment test
//! against regions whose envelope intersects the point.

use geo::{Contains, LineString, MultiPolygon, Point, Polygon};
use rstar::{AABB, RTree, RTreeObject};

/// A named geographic region.
#[derive(Debug, Clone)]
pub struct Region {
    /// Stable region identifier (e.g. `"brisbane"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Known suburb names inside this region, used for text fallback.
    pub suburbs: Vec<String>,
    /// Boundary polygon. Regions without one can only match by text.
    pub boundary: Option<MultiPolygon<f64>>,
}

/// A region boundary stored in the R-tree with its owning region index.
struct RegionEntry {
    region_idx: usize,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for RegionEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Classifies coordinates into zero-or-one named region.
///
/// Constructed once and shared across all consumers. A point lookup tests
/// boundaries in declaration order (first containing region wins); when no
/// boundary contains the point, an optional text fallback is matched
/// case-insensitively against region names and suburb lists.
pub struct RegionClassifier {
    regions: Vec<Region>,
    tree: RTree<RegionEntry>,
}

impl RegionClassifier {
    /// Builds a classifier over the given region list.
    #[must_use]
    pub fn new(regions: Vec<Region>) -> Self {
        let entries: Vec<RegionEntry> = regions
            .iter()
            .enumerate()
            .filter_map(|(region_idx, region)| {
                let polygon = region.boundary.clone()?;
                Some(RegionEntry {
                    region_idx,
                    envelope: compute_envelope(&polygon),
                    polygon,
                })
            })
            .collect();

        log::debug!(
            "Region classifier: {} regions, {} with boundaries",
            regions.len(),
            entries.len()
        );

        Self {
            regions,
            tree: RTree::bulk_load(entries),
        }
    }

    /// Builds the classifier over the compiled-in region set.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_regions())
    }

    /// Returns the configured regions in declaration order.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Assigns a coordinate to zero-or-one region.
    ///
    /// Boundary containment wins; `text_fallback` (e.g. a suburb string from
    /// the feed) is only consulted when no boundary contains the point.
    /// Never fails; an unmatched point simply returns `None`.
    #[must_use]
    pub fn classify(&self, lat: f64, lng: f64, text_fallback: Option<&str>) -> Option<&Region> {
        let point = Point::new(lng, lat);
        let query_env = AABB::from_point([lng, lat]);

        // First containing region in declaration order wins when envelopes
        // overlap at the edges.
        let hit = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.contains(&point))
            .map(|entry| entry.region_idx)
            .min();

        if let Some(idx) = hit {
            return self.regions.get(idx);
        }

        let text = text_fallback?.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }

        self.regions.iter().find(|region| {
            matches_text(&text, &region.name)
                || region.suburbs.iter().any(|suburb| matches_text(&text, suburb))
        })
    }
}

/// Case-insensitive substring match in either direction: a feed locality
/// like `"Hope St, Caboolture"` matches the suburb `"Caboolture"`, and a
/// bare `"Caboolture"` fallback matches too.
fn matches_text(haystack_lower: &str, candidate: &str) -> bool {
    let candidate_lower = candidate.to_lowercase();
    haystack_lower.contains(&candidate_lower) || candidate_lower.contains(haystack_lower)
}

/// Computes the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    use geo::BoundingRect;

    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

/// Builds a region from its parts. Ring coordinates are `(lng, lat)` pairs.
fn region(id: &str, name: &str, suburbs: &[&str], ring: Option<&[(f64, f64)]>) -> Region {
    Region {
        id: id.to_string(),
        name: name.to_string(),
        suburbs: suburbs.iter().map(ToString::to_string).collect(),
        boundary: ring.map(|coords| {
            let exterior: LineString<f64> = coords.iter().copied().collect();
            MultiPolygon(vec![Polygon::new(exterior, vec![])])
        }),
    }
}

/// The fixed South-East-Queensland coverage set.
///
/// Boundaries are coarse convex rings; fine-grained attribution comes from
/// suburb text, not from these polygons. Toowoomba has no digitized boundary
/// and matches by text only.
fn builtin_regions() -> Vec<Region> {
    vec![
        region(
            "brisbane",
            "Brisbane",
            &[
                "Brisbane City",
                "Fortitude Valley",
                "South Bank",
                "West End",
                "Chermside",
                "Carindale",
                "Indooroopilly",
                "Mount Gravatt",
            ],
            Some(&[
                (152.90, -27.70),
                (153.30, -27.70),
                (153.30, -27.00),
                (152.90, -27.00),
                (152.90, -27.70),
            ]),
        ),
        region(
            "gold-coast",
            "Gold Coast",
            &[
                "Southport",
                "Surfers Paradise",
                "Burleigh Heads",
                "Robina",
                "Coolangatta",
                "Nerang",
            ],
            Some(&[
                (153.20, -28.20),
                (153.60, -28.20),
                (153.60, -27.70),
                (153.20, -27.70),
                (153.20, -28.20),
            ]),
        ),
        region(
            "sunshine-coast",
            "Sunshine Coast",
            &[
                "Maroochydore",
                "Caloundra",
                "Noosa Heads",
                "Buderim",
                "Nambour",
            ],
            Some(&[
                (152.90, -26.90),
                (153.20, -26.90),
                (153.20, -26.30),
                (152.90, -26.30),
                (152.90, -26.90),
            ]),
        ),
        region(
            "ipswich",
            "Ipswich",
            &["Booval", "Springfield", "Goodna", "Ripley"],
            Some(&[
                (152.60, -27.80),
                (152.90, -27.80),
                (152.90, -27.50),
                (152.60, -27.50),
                (152.60, -27.80),
            ]),
        ),
        region(
            "logan",
            "Logan",
            &["Logan Central", "Beenleigh", "Springwood", "Shailer Park"],
            Some(&[
                (152.90, -27.90),
                (153.30, -27.90),
                (153.30, -27.70),
                (152.90, -27.70),
                (152.90, -27.90),
            ]),
        ),
        region(
            "moreton-bay",
            "Moreton Bay",
            &["Caboolture", "Redcliffe", "North Lakes", "Strathpine"],
            Some(&[
                (152.70, -27.40),
                (153.20, -27.40),
                (153.20, -26.90),
                (152.70, -26.90),
                (152.70, -27.40),
            ]),
        ),
        region(
            "toowoomba",
            "Toowoomba",
            &["Highfields", "Drayton", "Wilsonton"],
            None,
        ),
    ]
}
