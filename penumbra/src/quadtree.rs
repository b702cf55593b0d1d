//! Quad tree allocation of square, power-of-two tiles inside the atlas.
//!
//! Nodes live in an index arena. A node is either vacant, occupied, or split
//! into exactly four children. Freeing a tile turns it back into a vacant
//! leaf but never merges it with vacant siblings. A split node is only turned
//! back into a leaf when a request of exactly its size finds its whole
//! subtree empty, so partially used regions stay fragmented until the next
//! [`QuadTreeAllocator::clear`].

use glam::{UVec2, Vec4};

/// Position and size of a tile inside the atlas, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowCoordinate {
    pub offset: UVec2,
    pub size: u32,
}

impl ShadowCoordinate {
    /// `(scale.x, scale.y, offset.x, offset.y)` mapping the unit square onto this tile.
    pub fn scale_offset(&self, atlas_size: u32) -> Vec4 {
        let atlas = atlas_size as f32;
        let scale = self.size as f32 / atlas;
        Vec4::new(scale, scale, self.offset.x as f32 / atlas, self.offset.y as f32 / atlas)
    }

    /// `(min.x, min.y, max.x, max.y)` in texels, max exclusive.
    pub fn bounds(&self) -> Vec4 {
        let min = self.offset.as_vec2();
        let max = (self.offset + UVec2::splat(self.size)).as_vec2();
        Vec4::new(min.x, min.y, max.x, max.y)
    }

    pub fn area(&self) -> u64 {
        self.size as u64 * self.size as u64
    }

    pub fn overlaps(&self, other: &ShadowCoordinate) -> bool {
        let self_max = self.offset + UVec2::splat(self.size);
        let other_max = other.offset + UVec2::splat(other.size);

        self.offset.x < other_max.x
            && other.offset.x < self_max.x
            && self.offset.y < other_max.y
            && other.offset.y < self_max.y
    }
}

/// An occupied leaf of the quad tree.
///
/// Only the allocation that handed out a tile can free it. Once the leaf is
/// freed, reused, or the tree is cleared, the tile is stale and freeing it
/// does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    node: usize,
    generation: u64,
    coordinate: ShadowCoordinate,
}

impl Tile {
    pub fn coordinate(&self) -> ShadowCoordinate {
        self.coordinate
    }

    pub fn offset(&self) -> UVec2 {
        self.coordinate.offset
    }

    pub fn size(&self) -> u32 {
        self.coordinate.size
    }
}

#[cfg_attr(test, derive(PartialEq, Eq))]
#[derive(Debug, Clone, Copy)]
enum NodeState {
    Vacant,
    Occupied,
    Children([usize; 4]),
}

#[derive(Debug, Clone, Copy)]
struct QuadNode {
    coordinate: ShadowCoordinate,
    state: NodeState,
    /// Stamp of the allocation that last occupied this node.
    generation: u64,
}

/// Allocates square tiles out of a square atlas.
#[derive(Debug, Clone)]
pub struct QuadTreeAllocator {
    nodes: Vec<QuadNode>,
    recycled: Vec<usize>,
    // never reset, tiles from before a clear stay stale
    generation: u64,
    size: u32,
    min_tile_size: u32,
    occupied_area: u64,
}

impl QuadTreeAllocator {
    /// `size` and `min_tile_size` must be powers of two with `min_tile_size <= size`.
    pub fn new(size: u32, min_tile_size: u32) -> Self {
        debug_assert!(size.is_power_of_two());
        debug_assert!(min_tile_size.is_power_of_two());
        debug_assert!(min_tile_size <= size);

        let mut this = Self {
            nodes: Vec::new(),
            recycled: Vec::new(),
            generation: 0,
            size,
            min_tile_size,
            occupied_area: 0,
        };
        this.clear();
        this
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn min_tile_size(&self) -> u32 {
        self.min_tile_size
    }

    /// Maximum number of splits between the root and a minimum-size tile.
    pub fn depth_limit(&self) -> u32 {
        self.size.trailing_zeros() - self.min_tile_size.trailing_zeros()
    }

    pub fn free_area(&self) -> u64 {
        self.size as u64 * self.size as u64 - self.occupied_area
    }

    pub fn occupied_area(&self) -> u64 {
        self.occupied_area
    }

    /// Drops every tile, leaving a single vacant root.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.recycled.clear();
        self.occupied_area = 0;
        self.nodes.push(QuadNode {
            coordinate: ShadowCoordinate {
                offset: UVec2::ZERO,
                size: self.size,
            },
            state: NodeState::Vacant,
            generation: 0,
        });
    }

    /// Allocates a square tile large enough for `width` x `height`.
    ///
    /// The request is rounded up to a power of two no smaller than the
    /// minimum tile size. Returns None when no vacant leaf can hold it.
    pub fn allocate(&mut self, width: u32, height: u32) -> Option<Tile> {
        let size = width.max(height).max(self.min_tile_size).checked_next_power_of_two()?;
        if size > self.size {
            return None;
        }

        let node = self.try_alloc(0, size)?;
        Some(self.tile(node))
    }

    /// Claims exactly the tile at `offset` with side `size`, if it is vacant.
    pub fn allocate_at(&mut self, offset: UVec2, size: u32) -> Option<Tile> {
        let aligned = size.is_power_of_two() && offset.x % size == 0 && offset.y % size == 0;
        let in_bounds = size >= self.min_tile_size
            && size <= self.size
            && offset.x <= self.size - size
            && offset.y <= self.size - size;
        if !aligned || !in_bounds {
            return None;
        }

        let mut node_idx = 0;
        loop {
            let node = self.nodes[node_idx];
            if node.coordinate.size == size {
                let claimed = match node.state {
                    NodeState::Vacant => {
                        self.occupy(node_idx);
                        true
                    }
                    NodeState::Occupied => false,
                    NodeState::Children(_) => self.reclaim(node_idx),
                };
                return claimed.then(|| self.tile(node_idx));
            }

            let children = match node.state {
                NodeState::Occupied => return None,
                NodeState::Vacant => self.split(node_idx),
                NodeState::Children(children) => children,
            };

            let half = node.coordinate.size / 2;
            let quadrant = (offset - node.coordinate.offset) / half;
            node_idx = children[(quadrant.y * 2 + quadrant.x) as usize];
        }
    }

    /// Turns the tile's leaf back into a vacant leaf.
    ///
    /// Returns false if the tile is stale: already freed, or its leaf was
    /// split, reclaimed or cleared since it was handed out.
    pub fn free(&mut self, tile: Tile) -> bool {
        let Some(node) = self.nodes.get_mut(tile.node) else {
            return false;
        };
        let live = matches!(node.state, NodeState::Occupied)
            && node.generation == tile.generation
            && node.coordinate == tile.coordinate;
        if !live {
            return false;
        }

        node.state = NodeState::Vacant;
        self.occupied_area -= node.coordinate.area();
        true
    }

    /// Every occupied leaf reachable from the root.
    pub fn occupied_tiles(&self) -> Vec<Tile> {
        let mut tiles = Vec::new();
        let mut stack = vec![0];
        while let Some(node_idx) = stack.pop() {
            match self.nodes[node_idx].state {
                NodeState::Vacant => {}
                NodeState::Occupied => tiles.push(self.tile(node_idx)),
                NodeState::Children(children) => stack.extend(children),
            }
        }
        tiles
    }

    fn try_alloc(&mut self, node_idx: usize, size: u32) -> Option<usize> {
        let node = self.nodes[node_idx];
        if node.coordinate.size < size {
            return None;
        }

        match node.state {
            NodeState::Occupied => None,
            NodeState::Vacant if node.coordinate.size == size => {
                self.occupy(node_idx);
                Some(node_idx)
            }
            NodeState::Vacant => {
                let children = self.split(node_idx);
                children.into_iter().find_map(|child| self.try_alloc(child, size))
            }
            NodeState::Children(_) if node.coordinate.size == size => self.reclaim(node_idx).then_some(node_idx),
            NodeState::Children(children) => children.into_iter().find_map(|child| self.try_alloc(child, size)),
        }
    }

    /// Collapses an empty split node into an occupied leaf. Fails if anything below it is occupied.
    fn reclaim(&mut self, node_idx: usize) -> bool {
        let NodeState::Children(children) = self.nodes[node_idx].state else {
            return false;
        };

        let mut stack = children.to_vec();
        while let Some(idx) = stack.pop() {
            match self.nodes[idx].state {
                NodeState::Vacant => {}
                NodeState::Occupied => return false,
                NodeState::Children(children) => stack.extend(children),
            }
        }

        for child in children {
            self.release_subtree(child);
        }
        self.nodes[node_idx].state = NodeState::Vacant;
        self.occupy(node_idx);
        true
    }

    fn occupy(&mut self, node_idx: usize) {
        let node = &mut self.nodes[node_idx];
        debug_assert!(matches!(node.state, NodeState::Vacant));
        self.generation += 1;
        node.state = NodeState::Occupied;
        node.generation = self.generation;
        self.occupied_area += node.coordinate.area();
    }

    fn split(&mut self, node_idx: usize) -> [usize; 4] {
        let parent = self.nodes[node_idx].coordinate;
        debug_assert!(parent.size / 2 >= self.min_tile_size);
        let half = parent.size / 2;

        let children = std::array::from_fn(|child_idx| {
            // child_idx turned from [0, 3] to a 2x2 square.
            let child_2d_idx = UVec2::new(child_idx as u32 % 2, child_idx as u32 / 2);
            self.push_node(QuadNode {
                coordinate: ShadowCoordinate {
                    offset: parent.offset + half * child_2d_idx,
                    size: half,
                },
                state: NodeState::Vacant,
                generation: 0,
            })
        });
        self.nodes[node_idx].state = NodeState::Children(children);
        children
    }

    fn push_node(&mut self, node: QuadNode) -> usize {
        match self.recycled.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release_subtree(&mut self, node_idx: usize) {
        match self.nodes[node_idx].state {
            NodeState::Vacant => {}
            NodeState::Occupied => self.occupied_area -= self.nodes[node_idx].coordinate.area(),
            NodeState::Children(children) => {
                for child in children {
                    self.release_subtree(child);
                }
            }
        }
        self.nodes[node_idx].state = NodeState::Vacant;
        self.recycled.push(node_idx);
    }

    fn tile(&self, node_idx: usize) -> Tile {
        let node = &self.nodes[node_idx];
        Tile {
            node: node_idx,
            generation: node.generation,
            coordinate: node.coordinate,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec2, Vec4};

    use super::{NodeState, QuadTreeAllocator, ShadowCoordinate};

    #[test]
    fn single_full_size_allocation() {
        let mut tree = QuadTreeAllocator::new(1024, 64);

        let tile = tree.allocate(1024, 1024).unwrap();
        assert_eq!(tile.offset(), UVec2::ZERO);
        assert_eq!(tile.size(), 1024);
        assert_eq!(tree.nodes[0].state, NodeState::Occupied);
        assert!(tree.allocate(64, 64).is_none());
        assert_eq!(tree.free_area(), 0);
    }

    #[test]
    fn subdivision_fills_quadrants_in_order() {
        let mut tree = QuadTreeAllocator::new(256, 64);

        let offsets: Vec<_> = (0..4).map(|_| tree.allocate(128, 128).unwrap().offset()).collect();
        assert_eq!(
            offsets,
            [
                UVec2::new(0, 0),
                UVec2::new(128, 0),
                UVec2::new(0, 128),
                UVec2::new(128, 128)
            ]
        );
        assert_eq!(tree.nodes[0].state, NodeState::Children([1, 2, 3, 4]));
        assert!(tree.allocate(128, 128).is_none());
    }

    #[test]
    fn nested_subdivision() {
        let mut tree = QuadTreeAllocator::new(256, 64);

        let first = tree.allocate(128, 128).unwrap();
        let second = tree.allocate(64, 64).unwrap();
        let third = tree.allocate(128, 128).unwrap();

        assert_eq!(first.offset(), UVec2::new(0, 0));
        // the second quadrant is split to hold the small tile
        assert_eq!(second.offset(), UVec2::new(128, 0));
        assert_eq!(third.offset(), UVec2::new(0, 128));
    }

    #[test]
    fn requests_round_up() {
        let mut tree = QuadTreeAllocator::new(1024, 64);

        assert_eq!(tree.allocate(10, 3).unwrap().size(), 64);
        assert_eq!(tree.allocate(100, 200).unwrap().size(), 256);
        assert!(tree.allocate(2048, 2048).is_none());
    }

    #[test]
    fn free_does_not_merge_siblings() {
        let mut tree = QuadTreeAllocator::new(256, 64);

        let tiles: Vec<_> = (0..4).map(|_| tree.allocate(128, 128).unwrap()).collect();
        for tile in &tiles[1..] {
            assert!(tree.free(*tile));
        }

        // the root stays split, one quadrant still in use blocks the full size
        assert!(matches!(tree.nodes[0].state, NodeState::Children(_)));
        assert!(tree.allocate(256, 256).is_none());
        assert_eq!(tree.allocate(128, 128).unwrap().offset(), UVec2::new(128, 0));

        tree.clear();
        assert!(tree.allocate(256, 256).is_some());
    }

    #[test]
    fn empty_subtree_is_reclaimed_at_its_size() {
        let mut tree = QuadTreeAllocator::new(256, 64);

        let tiles: Vec<_> = (0..16).map(|_| tree.allocate(64, 64).unwrap()).collect();
        assert!(tree.allocate(64, 64).is_none());
        for tile in tiles {
            assert!(tree.free(tile));
        }
        assert!(matches!(tree.nodes[0].state, NodeState::Children(_)));

        let full = tree.allocate(256, 256).unwrap();
        assert_eq!(full.coordinate(), ShadowCoordinate { offset: UVec2::ZERO, size: 256 });
        assert_eq!(tree.nodes[0].state, NodeState::Occupied);
        assert_eq!(tree.free_area(), 0);
        assert_eq!(tree.occupied_tiles(), vec![full]);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut tree = QuadTreeAllocator::new(256, 64);
        let tile = tree.allocate(64, 64).unwrap();

        assert!(tree.free(tile));
        assert!(!tree.free(tile));
    }

    #[test]
    fn reclaimed_children_are_recycled() {
        let mut tree = QuadTreeAllocator::new(256, 64);
        let tiles: Vec<_> = (0..16).map(|_| tree.allocate(64, 64).unwrap()).collect();
        let node_count = tree.nodes.len();
        assert_eq!(node_count, 21);
        for tile in tiles {
            assert!(tree.free(tile));
        }

        let full = tree.allocate(256, 256).unwrap();
        assert!(tree.free(full));
        assert!(tree.occupied_tiles().is_empty());

        // recycled nodes are reused instead of growing the arena
        let _ = tree.allocate(64, 64).unwrap();
        assert_eq!(tree.nodes.len(), node_count);
    }

    #[test]
    fn split_nodes_cannot_be_freed() {
        let mut tree = QuadTreeAllocator::new(256, 64);
        let tile = tree.allocate(64, 64).unwrap();

        let root = tree.tile(0);
        assert!(!tree.free(root));
        assert_eq!(tree.occupied_tiles(), vec![tile]);
        assert_eq!(tree.occupied_area(), 64 * 64);
    }

    #[test]
    fn stale_tile_does_not_free_a_resplit_node() {
        let mut tree = QuadTreeAllocator::new(256, 64);

        let big = tree.allocate(256, 256).unwrap();
        assert!(tree.free(big));
        let small = tree.allocate(64, 64).unwrap();

        assert!(!tree.free(big));
        assert_eq!(tree.occupied_tiles(), vec![small]);
        let other = tree.allocate(64, 64).unwrap();
        assert!(!small.coordinate().overlaps(&other.coordinate()));
    }

    #[test]
    fn stale_tile_does_not_free_after_clear() {
        let mut tree = QuadTreeAllocator::new(256, 64);

        let before = tree.allocate(64, 64).unwrap();
        tree.clear();
        let after = tree.allocate(64, 64).unwrap();
        assert_eq!(before.coordinate(), after.coordinate());

        assert!(!tree.free(before));
        assert_eq!(tree.occupied_tiles(), vec![after]);
        assert!(tree.free(after));
    }

    #[test]
    fn reused_leaf_rejects_the_previous_tile() {
        let mut tree = QuadTreeAllocator::new(256, 64);

        let first = tree.allocate(64, 64).unwrap();
        assert!(tree.free(first));
        let second = tree.allocate(64, 64).unwrap();
        assert_eq!(first.coordinate(), second.coordinate());

        assert!(!tree.free(first));
        assert!(tree.free(second));
    }

    #[test]
    fn allocate_at_exact_position() {
        let mut tree = QuadTreeAllocator::new(512, 64);

        let tile = tree.allocate_at(UVec2::new(192, 320), 64).unwrap();
        assert_eq!(tile.offset(), UVec2::new(192, 320));
        assert_eq!(tile.size(), 64);

        assert!(tree.allocate_at(UVec2::new(192, 320), 64).is_none());
        // the enclosing 128 tile is split now
        assert!(tree.allocate_at(UVec2::new(128, 256), 128).is_none());
        // misaligned and out of range requests fail
        assert!(tree.allocate_at(UVec2::new(32, 0), 64).is_none());
        assert!(tree.allocate_at(UVec2::new(512, 0), 64).is_none());
        assert!(tree.allocate_at(UVec2::new(0xFFFF_FFC0, 0), 64).is_none());
        assert!(tree.allocate_at(UVec2::new(0, 0xFFFF_FFC0), 64).is_none());
        assert!(tree.allocate_at(UVec2::ZERO, 32).is_none());

        let tiles = tree.occupied_tiles();
        assert_eq!(tiles, vec![tile]);
    }

    #[test]
    fn depth_limit() {
        assert_eq!(QuadTreeAllocator::new(4096, 64).depth_limit(), 6);
        assert_eq!(QuadTreeAllocator::new(64, 64).depth_limit(), 0);
    }

    #[test]
    fn coordinate_helpers() {
        let coordinate = ShadowCoordinate {
            offset: UVec2::new(1024, 512),
            size: 512,
        };
        assert_eq!(coordinate.scale_offset(4096), Vec4::new(0.125, 0.125, 0.25, 0.125));
        assert_eq!(coordinate.bounds(), Vec4::new(1024.0, 512.0, 1536.0, 1024.0));

        let neighbour = ShadowCoordinate {
            offset: UVec2::new(1536, 512),
            size: 512,
        };
        let inside = ShadowCoordinate {
            offset: UVec2::new(1280, 768),
            size: 64,
        };
        assert!(!coordinate.overlaps(&neighbour));
        assert!(coordinate.overlaps(&inside));
    }
}
