use std::{cmp::Reverse, ops::Range};

use ordered_float::OrderedFloat;
use penumbra_types::{LightKind, RawLightHandle, ShadowLight};
use smallvec::SmallVec;

use crate::{
    priority::{demand_ratio, raw_priority, tile_size_for_priority, PriorityBand, PriorityNormalizer},
    quadtree::{QuadTreeAllocator, ShadowCoordinate, Tile},
    util::typedefs::{FastHashMap, FastHashSet, FastIndexMap},
    visibility::{self, FaceMask},
    OptionsError, ShadowAtlasOptions, ViewCamera,
};

type FaceTiles = SmallVec<[Tile; 6]>;

/// One tile of the atlas assigned to one face of one light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasEntry {
    pub light: RawLightHandle,
    /// Cube face for point lights, None for single-face lights.
    pub face: Option<u8>,
    pub tile: Tile,
    pub priority: f32,
}

impl AtlasEntry {
    /// Face index as the shaders see it, -1 for single-face lights.
    pub fn face_index(&self) -> i32 {
        self.face.map_or(-1, i32::from)
    }
}

/// What the atlas did with last frame's placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasState {
    /// Placements were kept, only priorities were refreshed.
    Preserve,
    /// The tree was cleared and every visible light placed again.
    Rebuild,
}

/// Why a frame rebuilt the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// First frame, or [`ShadowAtlas::mark_dirty`] was called.
    Dirty,
    /// A light without tiles outranks every light that has tiles.
    NewLight(RawLightHandle),
    /// A light with tiles is still casting shadows but left the view.
    LostVisibility(RawLightHandle),
    /// A light with tiles changed priority by more than the configured threshold.
    PriorityShift(RawLightHandle),
}

/// Per-light result of a frame, in atlas placement order.
#[derive(Debug, Clone, PartialEq)]
pub struct LightShadowInfo {
    pub light: RawLightHandle,
    /// Index of the light in the slice passed to [`ShadowAtlas::update`].
    pub light_index: usize,
    /// First entry of this light in [`ShadowAtlas::entries`].
    pub base_slot: usize,
    /// Number of entries, 0 when the light has no shadow this frame.
    pub tile_count: usize,
    pub visible: bool,
    pub faces: FaceMask,
    pub priority: f32,
    /// Indices of the casters touching any face, filled in by the batch builder.
    pub casters: Vec<usize>,
}

impl LightShadowInfo {
    pub fn has_shadow(&self) -> bool {
        self.tile_count != 0
    }

    pub fn slots(&self) -> Range<usize> {
        self.base_slot..self.base_slot + self.tile_count
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub visible_lights: usize,
    pub visible_faces: usize,
    pub demand_ratio: f32,
    pub shadowed_lights: usize,
    /// Visible lights that did not get any tiles.
    pub shadowless_lights: usize,
    pub reacquired_lights: usize,
    pub evicted_lights: usize,
    /// Tiles still occupied by lights whose entries were dropped without a rebuild.
    pub leaked_tiles: usize,
}

/// Outcome of one [`ShadowAtlas::update`].
#[derive(Debug, Clone)]
pub struct ShadowFrame {
    pub state: AtlasState,
    pub rebuild_reason: Option<RebuildReason>,
    pub band: PriorityBand,
    /// Lights with shadows first, in placement order, then visible lights
    /// without shadows by priority, then lights outside the view.
    pub lights: Vec<LightShadowInfo>,
    pub stats: FrameStats,
}

#[derive(Debug, Clone)]
struct Candidate {
    handle: RawLightHandle,
    light_index: usize,
    kind: LightKind,
    faces: FaceMask,
    raw: f32,
    priority: f32,
}

/// Shadow atlas allocation state. Owns the quad tree and the list of placed tiles.
#[derive(Debug, Clone)]
pub struct ShadowAtlas {
    options: ShadowAtlasOptions,
    tree: QuadTreeAllocator,
    entries: Vec<AtlasEntry>,
    lookup: FastHashMap<(RawLightHandle, Option<u8>), usize>,
    dirty: bool,
    leaked_tiles: usize,
}

impl ShadowAtlas {
    pub fn new(options: ShadowAtlasOptions) -> Result<Self, OptionsError> {
        options.validate()?;

        Ok(Self {
            tree: QuadTreeAllocator::new(options.atlas_size, options.min_tile_size),
            options,
            entries: Vec::new(),
            lookup: FastHashMap::default(),
            dirty: true,
            leaked_tiles: 0,
        })
    }

    pub fn options(&self) -> &ShadowAtlasOptions {
        &self.options
    }

    pub fn size(&self) -> u32 {
        self.options.atlas_size
    }

    pub fn tree(&self) -> &QuadTreeAllocator {
        &self.tree
    }

    /// Placed tiles, grouped per light, in placement order.
    pub fn entries(&self) -> &[AtlasEntry] {
        &self.entries
    }

    /// Forces the next update to rebuild, e.g. after the atlas texture was recreated.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Where in the atlas the given light face was placed this frame.
    pub fn atlas_entry(&self, light: RawLightHandle, face: Option<u8>) -> Option<ShadowCoordinate> {
        self.entry(light, face).map(|entry| entry.tile.coordinate())
    }

    pub fn entry(&self, light: RawLightHandle, face: Option<u8>) -> Option<&AtlasEntry> {
        self.lookup.get(&(light, face)).map(|&slot| &self.entries[slot])
    }

    /// Runs visibility, scoring and allocation for one frame.
    pub fn update(&mut self, camera: &ViewCamera, lights: &[ShadowLight]) -> ShadowFrame {
        profiling::scope!("ShadowAtlas::update");

        let mut stats = FrameStats::default();
        let mut hidden = Vec::new();
        let mut candidates = Vec::with_capacity(lights.len());
        let mut eligible = FastHashSet::default();
        {
            profiling::scope!("Visibility");
            for (light_index, light) in lights.iter().enumerate() {
                if !visibility::is_eligible(light) {
                    continue;
                }
                eligible.insert(light.handle);

                let visibility = visibility::classify(camera, light);
                if !visibility.visible {
                    hidden.push((light.handle, light_index));
                    continue;
                }

                candidates.push(Candidate {
                    handle: light.handle,
                    light_index,
                    kind: light.kind,
                    faces: visibility.faces,
                    raw: raw_priority(light, camera.location()),
                    priority: 0.0,
                });
            }
        }

        stats.visible_lights = candidates.len();
        stats.visible_faces = candidates.iter().map(|c| c.faces.count()).sum();
        stats.demand_ratio = demand_ratio(stats.visible_faces, &self.options);
        let band = PriorityBand::for_demand(stats.demand_ratio, &self.options);
        {
            profiling::scope!("Priorities");
            let raw: Vec<f32> = candidates.iter().map(|c| c.raw).collect();
            let normalizer = PriorityNormalizer::new(band, &raw);
            for candidate in &mut candidates {
                candidate.priority = normalizer.normalize(candidate.raw);
            }
            // stable, equal priorities keep input order
            candidates.sort_by_key(|c| Reverse(OrderedFloat(c.priority)));
        }

        let rebuild_reason = self.rebuild_reason(&candidates, &eligible);
        let state = match rebuild_reason {
            Some(reason) => {
                log::debug!("Rebuilding shadow atlas: {:?}", reason);
                self.rebuild(&candidates, &mut stats);
                AtlasState::Rebuild
            }
            None => {
                self.preserve(&candidates);
                AtlasState::Preserve
            }
        };
        self.dirty = false;
        self.rebuild_lookup();

        let lights = self.shadow_infos(&candidates, &hidden);
        stats.shadowed_lights = lights.iter().filter(|info| info.has_shadow()).count();
        stats.shadowless_lights = stats.visible_lights - stats.shadowed_lights;
        stats.leaked_tiles = self.leaked_tiles;

        ShadowFrame {
            state,
            rebuild_reason,
            band,
            lights,
            stats,
        }
    }

    fn rebuild_reason(
        &self,
        candidates: &[Candidate],
        eligible: &FastHashSet<RawLightHandle>,
    ) -> Option<RebuildReason> {
        if self.dirty {
            return Some(RebuildReason::Dirty);
        }

        let mut previous = FastHashMap::default();
        for entry in &self.entries {
            previous.entry(entry.light).or_insert(entry.priority);
        }
        let previous_max = self.entries.iter().map(|entry| OrderedFloat(entry.priority)).max();

        for candidate in candidates {
            match previous.get(&candidate.handle) {
                None => {
                    if previous_max.map_or(true, |max| candidate.priority > max.0) {
                        return Some(RebuildReason::NewLight(candidate.handle));
                    }
                }
                Some(&old) => {
                    if (candidate.priority - old).abs() > self.options.priority_change_threshold * old {
                        return Some(RebuildReason::PriorityShift(candidate.handle));
                    }
                }
            }
        }

        let visible: FastHashSet<_> = candidates.iter().map(|c| c.handle).collect();
        previous
            .keys()
            .find(|handle| eligible.contains(*handle) && !visible.contains(*handle))
            .map(|&handle| RebuildReason::LostVisibility(handle))
    }

    fn preserve(&mut self, candidates: &[Candidate]) {
        profiling::scope!("ShadowAtlas::preserve");

        let priorities: FastHashMap<_, _> = candidates.iter().map(|c| (c.handle, c.priority)).collect();
        let before = self.entries.len();
        self.entries.retain_mut(|entry| match priorities.get(&entry.light) {
            Some(&priority) => {
                entry.priority = priority;
                true
            }
            None => false,
        });

        // The tiles of dropped entries stay occupied until the next rebuild.
        let dropped = before - self.entries.len();
        if dropped != 0 {
            self.leaked_tiles += dropped;
            log::debug!(
                "Dropped {} atlas entries of lights that stopped casting shadows, {} tiles held until the next rebuild",
                dropped,
                self.leaked_tiles
            );
        }

        for candidate in candidates.iter().filter(|c| !self.lookup.contains_key(&(c.handle, first_face(c.kind)))) {
            log::trace!(
                "Light {:?} became visible at priority {:.1}, waiting for the next rebuild",
                candidate.handle,
                candidate.priority
            );
        }
    }

    /// Re-acquires unchanged lights first, then places the rest, so entries
    /// (and the [`LightShadowInfo`] order built from them) follow placement
    /// order rather than strict priority order.
    fn rebuild(&mut self, candidates: &[Candidate], stats: &mut FrameStats) {
        profiling::scope!("ShadowAtlas::rebuild");

        let mut previous: FastHashMap<RawLightHandle, SmallVec<[ShadowCoordinate; 6]>> = FastHashMap::default();
        for entry in self.entries.drain(..) {
            previous.entry(entry.light).or_default().push(entry.tile.coordinate());
        }
        self.tree.clear();
        self.leaked_tiles = 0;

        // Lights whose tile size did not change try to keep their exact tiles
        // first, so one new light does not reshuffle the whole atlas.
        let mut pending = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let size = tile_size_for_priority(candidate.priority, &self.options);
            if let Some(coordinates) = previous.get(&candidate.handle) {
                let same_shape = coordinates.len() == candidate.kind.face_count()
                    && coordinates.iter().all(|coordinate| coordinate.size == size);
                if same_shape && self.reacquire(candidate, coordinates) {
                    stats.reacquired_lights += 1;
                    continue;
                }
            }
            pending.push((candidate, size));
        }

        for (candidate, size) in pending {
            let face_count = candidate.kind.face_count();
            if let Some(tiles) = self.allocate_faces(face_count, size) {
                self.push_entries(candidate, &tiles);
                continue;
            }

            if self.options.eviction {
                let evicted = self.evict_for(candidate);
                stats.evicted_lights += evicted;
                if evicted != 0 {
                    if let Some(tiles) = self.allocate_faces(face_count, size) {
                        self.push_entries(candidate, &tiles);
                        continue;
                    }
                }
            }

            log::warn!(
                "No atlas space for light {:?} ({} faces at priority {:.1}), it renders without shadows this frame",
                candidate.handle,
                face_count,
                candidate.priority
            );
        }
    }

    fn reacquire(&mut self, candidate: &Candidate, coordinates: &[ShadowCoordinate]) -> bool {
        let mut tiles = FaceTiles::new();
        for coordinate in coordinates {
            match self.tree.allocate_at(coordinate.offset, coordinate.size) {
                Some(tile) => tiles.push(tile),
                None => {
                    for tile in tiles {
                        self.tree.free(tile);
                    }
                    return false;
                }
            }
        }

        self.push_entries(candidate, &tiles);
        true
    }

    /// Places `face_count` tiles of one common size, halving the size down to
    /// the minimum. Either every face gets a tile or none does.
    fn allocate_faces(&mut self, face_count: usize, start_size: u32) -> Option<FaceTiles> {
        let mut size = start_size.clamp(self.options.min_tile_size, self.options.max_tile_size);
        loop {
            let mut tiles = FaceTiles::new();
            while tiles.len() < face_count {
                match self.tree.allocate(size, size) {
                    Some(tile) => tiles.push(tile),
                    None => break,
                }
            }
            if tiles.len() == face_count {
                return Some(tiles);
            }

            for tile in tiles {
                self.tree.free(tile);
            }
            if size <= self.options.min_tile_size {
                return None;
            }
            size /= 2;
        }
    }

    /// Frees whole lights of lower priority than `requester`, lowest first,
    /// until enough area for its faces at minimum size is free.
    ///
    /// Returns the number of evicted lights. Nothing is evicted if all
    /// eligible victims together would not free enough area.
    fn evict_for(&mut self, requester: &Candidate) -> usize {
        let min_area = self.options.min_tile_size as u64 * self.options.min_tile_size as u64;
        let needed = requester.kind.face_count() as u64 * min_area;
        let mut available = self.tree.free_area();
        if available >= needed {
            return 0;
        }

        // (priority, area) per light, in entry order
        let mut victims: FastIndexMap<RawLightHandle, (f32, u64)> = FastIndexMap::default();
        for entry in self.entries.iter().filter(|entry| entry.priority < requester.priority) {
            let victim = victims.entry(entry.light).or_insert((entry.priority, 0));
            victim.1 += entry.tile.coordinate().area();
        }
        let mut victims: Vec<_> = victims.into_iter().collect();
        // stable, equal priorities are evicted in entry order
        victims.sort_by_key(|(_, (priority, _))| OrderedFloat(*priority));

        let mut staged: SmallVec<[RawLightHandle; 8]> = SmallVec::new();
        for (handle, (_, area)) in victims {
            if available >= needed {
                break;
            }
            staged.push(handle);
            available += area;
        }
        if available < needed {
            return 0;
        }

        // Tree first, so a failed retry never leaves tiles without entries.
        for entry in &self.entries {
            if staged.contains(&entry.light) {
                self.tree.free(entry.tile);
            }
        }
        self.entries.retain(|entry| !staged.contains(&entry.light));

        for handle in &staged {
            log::debug!("Evicted light {:?} to make room for {:?}", handle, requester.handle);
        }
        staged.len()
    }

    fn push_entries(&mut self, candidate: &Candidate, tiles: &[Tile]) {
        let cube = candidate.kind == LightKind::Point;
        for (face, tile) in tiles.iter().enumerate() {
            self.entries.push(AtlasEntry {
                light: candidate.handle,
                face: cube.then_some(face as u8),
                tile: *tile,
                priority: candidate.priority,
            });
        }
    }

    fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for (slot, entry) in self.entries.iter().enumerate() {
            self.lookup.insert((entry.light, entry.face), slot);
        }
    }

    fn shadow_infos(&self, candidates: &[Candidate], hidden: &[(RawLightHandle, usize)]) -> Vec<LightShadowInfo> {
        let by_handle: FastHashMap<_, _> = candidates.iter().map(|c| (c.handle, c)).collect();
        let mut placed = FastHashSet::default();
        let mut infos = Vec::with_capacity(candidates.len() + hidden.len());

        let mut slot = 0;
        while slot < self.entries.len() {
            let light = self.entries[slot].light;
            let tile_count = self.entries[slot..]
                .iter()
                .take_while(|entry| entry.light == light)
                .count();

            match by_handle.get(&light) {
                Some(candidate) => {
                    infos.push(LightShadowInfo {
                        light,
                        light_index: candidate.light_index,
                        base_slot: slot,
                        tile_count,
                        visible: true,
                        faces: candidate.faces,
                        priority: candidate.priority,
                        casters: Vec::new(),
                    });
                    placed.insert(light);
                }
                None => debug_assert!(false, "atlas entry for light {:?} without a candidate", light),
            }
            slot += tile_count;
        }

        for candidate in candidates.iter().filter(|c| !placed.contains(&c.handle)) {
            infos.push(LightShadowInfo {
                light: candidate.handle,
                light_index: candidate.light_index,
                base_slot: 0,
                tile_count: 0,
                visible: true,
                faces: candidate.faces,
                priority: candidate.priority,
                casters: Vec::new(),
            });
        }

        for &(light, light_index) in hidden {
            infos.push(LightShadowInfo {
                light,
                light_index,
                base_slot: 0,
                tile_count: 0,
                visible: false,
                faces: FaceMask::empty(),
                priority: 0.0,
                casters: Vec::new(),
            });
        }

        infos
    }
}

fn first_face(kind: LightKind) -> Option<u8> {
    (kind == LightKind::Point).then_some(0)
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use penumbra_types::{RawLightHandle, ShadowLight};

    use super::{AtlasState, RebuildReason, ShadowAtlas};
    use crate::{ShadowAtlasOptions, ViewCamera};

    fn camera() -> ViewCamera {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 200.0);
        ViewCamera::from_view_projection(view, projection)
    }

    fn spot(idx: usize, x: f32, z: f32, intensity: f32) -> ShadowLight {
        ShadowLight::spot(
            RawLightHandle::new(idx),
            Vec3::new(x, 0.0, z),
            Vec3::NEG_Z,
            0.5,
            30.0,
            intensity,
        )
    }

    fn small_atlas() -> ShadowAtlas {
        // 16 tiles of 64, every light gets exactly one size
        ShadowAtlas::new(ShadowAtlasOptions {
            atlas_size: 256,
            min_tile_size: 64,
            max_tile_size: 64,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn first_frame_rebuilds_then_preserves() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default()).unwrap();
        let lights = [spot(0, 0.0, -10.0, 100.0), spot(1, 5.0, -30.0, 50.0)];

        let first = atlas.update(&camera(), &lights);
        assert_eq!(first.state, AtlasState::Rebuild);
        assert_eq!(first.rebuild_reason, Some(RebuildReason::Dirty));
        assert_eq!(first.stats.shadowed_lights, 2);
        let placements = atlas.entries().to_vec();

        let second = atlas.update(&camera(), &lights);
        assert_eq!(second.state, AtlasState::Preserve);
        assert_eq!(atlas.entries(), &placements[..]);
    }

    #[test]
    fn mark_dirty_forces_rebuild() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default()).unwrap();
        let lights = [spot(0, 0.0, -10.0, 100.0)];

        atlas.update(&camera(), &lights);
        atlas.mark_dirty();
        assert!(atlas.is_dirty());

        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Rebuild);
        assert!(!atlas.is_dirty());
        // the same size is implied, so the exact tile is taken again
        assert_eq!(frame.stats.reacquired_lights, 1);
    }

    #[test]
    fn brighter_new_light_rebuilds_dimmer_one_waits() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default()).unwrap();
        let mut lights = vec![spot(0, 0.0, -10.0, 100.0), spot(1, 2.0, -20.0, 50.0)];
        atlas.update(&camera(), &lights);

        // dimmer than everything placed: no rebuild, no shadow yet
        lights.push(spot(2, -2.0, -60.0, 10.0));
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Preserve);
        assert!(atlas.atlas_entry(RawLightHandle::new(2), None).is_none());
        assert_eq!(frame.stats.shadowless_lights, 1);

        // brighter than everything placed, pushes the others down the band
        lights.push(spot(3, 0.0, -3.0, 400.0));
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Rebuild);
        assert!(atlas.atlas_entry(RawLightHandle::new(2), None).is_some());
        assert!(atlas.atlas_entry(RawLightHandle::new(3), None).is_some());
    }

    #[test]
    fn losing_visibility_rebuilds() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default()).unwrap();
        // hiding the middle light keeps the extremes, so nobody else shifts
        let mut lights = vec![spot(0, 0.0, -10.0, 100.0), spot(1, 0.0, -20.0, 100.0), spot(2, 0.0, -40.0, 100.0)];
        atlas.update(&camera(), &lights);

        lights[1].visible = false;
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Rebuild);
        assert_eq!(
            frame.rebuild_reason,
            Some(RebuildReason::LostVisibility(RawLightHandle::new(1)))
        );
        assert!(atlas.atlas_entry(RawLightHandle::new(1), None).is_none());
        assert_eq!(atlas.tree().occupied_tiles().len(), 2);

        let hidden = frame.lights.iter().find(|info| info.light == RawLightHandle::new(1)).unwrap();
        assert!(!hidden.visible);
        assert!(!hidden.has_shadow());
    }

    #[test]
    fn large_priority_shift_rebuilds() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default()).unwrap();
        let mut lights = vec![spot(0, 0.0, -10.0, 100.0), spot(1, 0.0, -20.0, 100.0), spot(2, 0.0, -40.0, 100.0)];
        atlas.update(&camera(), &lights);

        // the middle light becomes the brightest and jumps to the top of the band
        lights[1].intensity = 1000.0;
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Rebuild);
        assert_eq!(
            frame.rebuild_reason,
            Some(RebuildReason::PriorityShift(RawLightHandle::new(1)))
        );
    }

    #[test]
    fn disabled_light_is_dropped_without_freeing() {
        let mut atlas = small_atlas();
        let mut lights = vec![spot(0, 0.0, -10.0, 100.0), spot(1, 0.0, -20.0, 100.0), spot(2, 0.0, -40.0, 100.0)];
        atlas.update(&camera(), &lights);
        assert_eq!(atlas.tree().occupied_tiles().len(), 3);

        lights[1].cast_shadows = false;
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Preserve);
        assert_eq!(atlas.entries().len(), 2);
        assert_eq!(atlas.tree().occupied_tiles().len(), 3);
        assert_eq!(frame.stats.leaked_tiles, 1);
        assert!(frame.lights.iter().all(|info| info.light != RawLightHandle::new(1)));

        atlas.mark_dirty();
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.stats.leaked_tiles, 0);
        assert_eq!(atlas.tree().occupied_tiles().len(), 2);
    }

    #[test]
    fn point_light_is_placed_atomically() {
        let mut atlas = small_atlas();
        // eleven bright spots leave five free tiles
        let mut lights: Vec<_> = (0..11).map(|i| spot(i, i as f32 - 5.0, -5.0, 200.0)).collect();
        // a dim, distant point light that cannot evict anything
        lights.push(ShadowLight::point(RawLightHandle::new(11), Vec3::new(0.0, 0.0, -150.0), 10.0, 5.0));

        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.stats.shadowed_lights, 11);
        assert_eq!(frame.stats.evicted_lights, 0);
        assert!(atlas.entries().iter().all(|entry| entry.light != RawLightHandle::new(11)));
        assert_eq!(atlas.tree().occupied_tiles().len(), 11);

        let point = frame.lights.iter().find(|info| info.light == RawLightHandle::new(11)).unwrap();
        assert!(point.visible);
        assert_eq!(point.tile_count, 0);
    }

    #[test]
    fn bright_point_light_evicts_dim_lights() {
        let mut atlas = small_atlas();
        let mut lights: Vec<_> = (0..16).map(|i| spot(i, i as f32 - 8.0, -20.0 - i as f32, 10.0)).collect();
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.stats.shadowed_lights, 16);
        assert_eq!(atlas.tree().free_area(), 0);

        lights.push(ShadowLight::point(RawLightHandle::new(16), Vec3::new(0.0, 0.0, -2.0), 50.0, 100.0));
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Rebuild);
        assert_eq!(frame.stats.evicted_lights, 6);

        let point_entries: Vec<_> = atlas
            .entries()
            .iter()
            .filter(|entry| entry.light == RawLightHandle::new(16))
            .collect();
        assert_eq!(point_entries.len(), 6);
        for (face, entry) in point_entries.iter().enumerate() {
            assert_eq!(entry.face, Some(face as u8));
            assert_eq!(entry.face_index(), face as i32);
        }

        // the six dimmest, i.e. farthest, spots were the ones evicted
        for evicted in 10..16 {
            assert!(atlas.atlas_entry(RawLightHandle::new(evicted), None).is_none());
        }
        for kept in 0..10 {
            assert!(atlas.atlas_entry(RawLightHandle::new(kept), None).is_some());
        }
    }

    #[test]
    fn equal_priority_victims_are_evicted_in_entry_order() {
        let mut atlas = small_atlas();
        let mut lights: Vec<_> = (0..8).map(|i| spot(i, i as f32 - 4.0, -5.0, 200.0)).collect();
        // eight identical dim spots share one priority, the lowest in the band
        lights.extend((8..16).map(|i| spot(i, 0.0, -40.0, 10.0)));
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.stats.shadowed_lights, 16);
        let dim_priority = atlas.entry(RawLightHandle::new(8), None).unwrap().priority;
        for i in 9..16 {
            assert_eq!(atlas.entry(RawLightHandle::new(i), None).unwrap().priority, dim_priority);
        }

        // ranks between the bright and the dim spots
        lights.push(ShadowLight::point(RawLightHandle::new(16), Vec3::new(0.0, 0.0, -10.0), 20.0, 100.0));
        atlas.mark_dirty();
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.stats.evicted_lights, 6);
        assert!(atlas.entry(RawLightHandle::new(16), Some(0)).unwrap().priority > dim_priority);

        for evicted in 8..14 {
            assert!(atlas.atlas_entry(RawLightHandle::new(evicted), None).is_none());
        }
        for kept in (0..8).chain(14..16) {
            assert!(atlas.atlas_entry(RawLightHandle::new(kept), None).is_some());
        }
    }

    #[test]
    fn priority_shift_threshold_is_exclusive() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default()).unwrap();
        // identical lights normalize to the band midpoint, 80
        let lights = [spot(0, 0.0, -10.0, 100.0), spot(1, 0.0, -10.0, 100.0)];
        atlas.update(&camera(), &lights);
        assert_eq!(atlas.entries()[0].light, RawLightHandle::new(0));
        assert_eq!(atlas.entries()[0].priority, 80.0);

        // 80 is exactly 20% below 100
        atlas.entries[0].priority = 100.0;
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Preserve);
        assert_eq!(atlas.entries()[0].priority, 80.0);

        atlas.entries[0].priority = 101.0;
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.state, AtlasState::Rebuild);
        assert_eq!(
            frame.rebuild_reason,
            Some(RebuildReason::PriorityShift(RawLightHandle::new(0)))
        );
    }

    #[test]
    fn eviction_can_be_disabled() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions {
            atlas_size: 256,
            min_tile_size: 64,
            max_tile_size: 64,
            eviction: false,
            ..Default::default()
        })
        .unwrap();
        let mut lights: Vec<_> = (0..16).map(|i| spot(i, i as f32 - 8.0, -20.0 - i as f32, 10.0)).collect();
        atlas.update(&camera(), &lights);

        lights.push(ShadowLight::point(RawLightHandle::new(16), Vec3::new(0.0, 0.0, -2.0), 50.0, 100.0));
        let frame = atlas.update(&camera(), &lights);
        assert_eq!(frame.stats.evicted_lights, 0);
        assert_eq!(frame.stats.shadowless_lights, 1);
        assert!(atlas.atlas_entry(RawLightHandle::new(16), Some(0)).is_none());
    }

    #[test]
    fn infos_follow_placement_order() {
        let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default()).unwrap();
        let lights = [
            spot(0, 0.0, -40.0, 20.0),
            ShadowLight::point(RawLightHandle::new(1), Vec3::new(0.0, 0.0, -5.0), 20.0, 300.0),
        ];
        let frame = atlas.update(&camera(), &lights);

        assert_eq!(frame.lights[0].light, RawLightHandle::new(1));
        assert_eq!(frame.lights[0].light_index, 1);
        assert_eq!(frame.lights[0].slots(), 0..6);
        assert_eq!(frame.lights[1].light, RawLightHandle::new(0));
        assert_eq!(frame.lights[1].slots(), 6..7);
        assert!(frame.lights[0].priority >= frame.lights[1].priority);
    }
}
