//! Barnes-Hut quadtree, CPU reference of the five GPU passes
//!
//! Node indices share one space: `[0, n)` are bodies and `[n, n + capacity)` are cells.
//! The root is the highest index and cells are claimed downward from it, so a child cell
//! always has a lower index than its parent. The center pass therefore walks cells in
//! ascending order and the sort pass walks them in descending order.

use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use glam::Vec2;
use rayon::prelude::*;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::forces::{integrate, softened_acceleration, StepParams};
use crate::particle::Particle;

/// Axis-aligned bounds of a particle set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec2,
    pub max: Vec2,
}

impl BoundingBox {
    pub const EMPTY: Self = Self {
        min: Vec2::splat(f32::INFINITY),
        max: Vec2::splat(f32::NEG_INFINITY),
    };

    pub fn include(self, point: Vec2) -> Self {
        Self {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// Half the side of the enclosing square
    pub fn half_size(&self) -> f32 {
        let extent = self.max - self.min;
        extent.x.max(extent.y) * 0.5
    }
}

/// Two-phase bounds reduction: one partial box per work-group sized chunk, then a final combine
pub fn compute_bounds(particles: &[Particle]) -> BoundingBox {
    let partials: Vec<BoundingBox> = particles
        .par_chunks(TREE_WORKGROUP_SIZE as usize)
        .map(|chunk| {
            chunk
                .iter()
                .fold(BoundingBox::EMPTY, |bounds, p| bounds.include(p.pos()))
        })
        .collect();
    partials
        .into_iter()
        .fold(BoundingBox::EMPTY, BoundingBox::union)
}

/// Number of tree cells reserved for `body_count` particles
pub fn cell_capacity(body_count: u32, cells_per_particle: u32) -> u32 {
    body_count
        .saturating_mul(cells_per_particle)
        .max(MIN_TREE_CELLS)
}

/// Quadrant of `point` relative to `center`: bit 0 is east, bit 1 is north
fn quadrant(point: Vec2, center: Vec2) -> usize {
    (point.x >= center.x) as usize | (((point.y >= center.y) as usize) << 1)
}

fn child_center(center: Vec2, half: f32, quadrant: usize) -> Vec2 {
    let offset = half * 0.5;
    Vec2::new(
        if quadrant & 1 != 0 { center.x + offset } else { center.x - offset },
        if quadrant & 2 != 0 { center.y + offset } else { center.y - offset },
    )
}

/// Shared state of the concurrent tree pass
struct TreeBuilder<'a> {
    particles: &'a [Particle],
    body_count: i32,
    root: i32,
    center: Vec2,
    half: f32,
    children: Vec<AtomicI32>,
    next: Vec<AtomicI32>,
    depth: Vec<AtomicU32>,
    width: Vec<AtomicU32>,
    bottom: AtomicI32,
    exhausted: AtomicBool,
}

impl TreeBuilder<'_> {
    fn slot(&self, cell: i32, quadrant: usize) -> usize {
        (cell - self.body_count) as usize * 4 + quadrant
    }

    /// Insert one body by claim-and-subdivide. Returns false once capacity ran out.
    fn insert(&self, body: i32) -> bool {
        let pos = self.particles[body as usize].pos();
        let mut node = self.root;
        let mut center = self.center;
        let mut half = self.half;
        let mut depth = 0;

        loop {
            if self.exhausted.load(Ordering::Relaxed) {
                return false;
            }

            let q = quadrant(pos, center);
            let slot = self.slot(node, q);
            let child = self.children[slot].load(Ordering::Acquire);

            if child >= self.body_count {
                node = child;
                center = child_center(center, half, q);
                half *= 0.5;
                depth += 1;
                continue;
            }

            if child == LOCKED_SLOT {
                spin_loop();
                continue;
            }

            if child == EMPTY_SLOT {
                if self.children[slot]
                    .compare_exchange(EMPTY_SLOT, body, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }

            // Slot holds a body: lock it, then chain or subdivide
            if self.children[slot]
                .compare_exchange(child, LOCKED_SLOT, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            if depth >= MAX_TREE_DEPTH {
                self.next[body as usize].store(child, Ordering::Relaxed);
                self.children[slot].store(body, Ordering::Release);
                return true;
            }

            let cell = self.bottom.fetch_sub(1, Ordering::Relaxed) - 1;
            if cell < self.body_count {
                self.exhausted.store(true, Ordering::Relaxed);
                self.children[slot].store(child, Ordering::Release);
                return false;
            }

            let sub_center = child_center(center, half, q);
            let sub_half = half * 0.5;
            let offset = (cell - self.body_count) as usize;
            self.depth[offset].store(depth + 1, Ordering::Relaxed);
            self.width[offset].store((sub_half * 2.0).to_bits(), Ordering::Relaxed);

            let existing = self.particles[child as usize].pos();
            let existing_slot = self.slot(cell, quadrant(existing, sub_center));
            self.children[existing_slot].store(child, Ordering::Relaxed);
            self.children[slot].store(cell, Ordering::Release);

            node = cell;
            center = sub_center;
            half = sub_half;
            depth += 1;
        }
    }
}

/// Quadtree over a particle slice
#[derive(Debug, Clone)]
pub struct QuadTree {
    body_count: usize,
    capacity: usize,
    bottom: usize,
    children: Vec<i32>,
    next: Vec<i32>,
    depth: Vec<u32>,
    width: Vec<f32>,
    mass: Vec<f32>,
    centroid: Vec<Vec2>,
    /// `[start, count]` into `sorted` for every node, bodies included
    ranges: Vec<[u32; 2]>,
    sorted: Vec<u32>,
}

impl QuadTree {
    /// Tree pass: concurrent claim-and-subdivide insertion of every particle.
    ///
    /// Fails with [`Error::ResourceExhaustion`] when the cells do not fit in `capacity`.
    pub fn build(particles: &[Particle], bounds: BoundingBox, capacity: u32) -> Result<Self> {
        if particles.is_empty() || bounds.is_empty() {
            return Err(Error::config("cannot build a tree over zero particles"));
        }
        if capacity == 0 {
            return Err(Error::config("tree needs at least one cell"));
        }

        let body_count = particles.len();
        let capacity = capacity as usize;
        let root = (body_count + capacity - 1) as i32;

        let builder = TreeBuilder {
            particles,
            body_count: body_count as i32,
            root,
            center: bounds.center(),
            half: bounds.half_size(),
            children: (0..capacity * 4).map(|_| AtomicI32::new(EMPTY_SLOT)).collect(),
            next: (0..body_count).map(|_| AtomicI32::new(EMPTY_SLOT)).collect(),
            depth: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            width: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            bottom: AtomicI32::new(root),
            exhausted: AtomicBool::new(false),
        };
        builder.width[capacity - 1].store((bounds.half_size() * 2.0).to_bits(), Ordering::Relaxed);

        (0..body_count as i32).into_par_iter().for_each(|body| {
            builder.insert(body);
        });

        let bottom = builder.bottom.load(Ordering::Relaxed);
        if builder.exhausted.load(Ordering::Relaxed) {
            let required = (root - bottom + 1) as u64;
            log::warn!("tree pass ran out of cells: {required} required, capacity {capacity}");
            return Err(Error::ResourceExhaustion {
                resource: "tree cells",
                required,
                capacity: capacity as u64,
            });
        }

        Ok(Self {
            body_count,
            capacity,
            bottom: bottom as usize,
            children: builder.children.into_iter().map(AtomicI32::into_inner).collect(),
            next: builder.next.into_iter().map(AtomicI32::into_inner).collect(),
            depth: builder.depth.into_iter().map(AtomicU32::into_inner).collect(),
            width: builder
                .width
                .into_iter()
                .map(|bits| f32::from_bits(bits.into_inner()))
                .collect(),
            mass: vec![0.0; capacity],
            centroid: vec![Vec2::ZERO; capacity],
            ranges: vec![[0, 0]; body_count + capacity],
            sorted: vec![0; body_count],
        })
    }

    pub fn root(&self) -> usize {
        self.body_count + self.capacity - 1
    }

    /// Number of cells in use, root included
    pub fn cell_count(&self) -> usize {
        self.root() + 1 - self.bottom
    }

    pub fn max_depth(&self) -> u32 {
        self.depth[self.bottom - self.body_count..]
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
    }

    fn child(&self, cell: usize, quadrant: usize) -> i32 {
        self.children[(cell - self.body_count) * 4 + quadrant]
    }

    pub fn cell_mass(&self, cell: usize) -> f32 {
        self.mass[cell - self.body_count]
    }

    pub fn cell_centroid(&self, cell: usize) -> Vec2 {
        self.centroid[cell - self.body_count]
    }

    /// Locality order produced by [`QuadTree::sort`]
    pub fn sorted(&self) -> &[u32] {
        &self.sorted
    }

    /// Center pass: total mass and centroid of every cell, children before parents
    pub fn summarize(&mut self, particles: &[Particle]) {
        for cell in self.bottom..=self.root() {
            let mut mass = 0.0;
            let mut weighted = Vec2::ZERO;
            let mut plain = Vec2::ZERO;
            let mut count = 0u32;

            for q in 0..4 {
                let child = self.child(cell, q);
                if child == EMPTY_SLOT {
                    continue;
                }
                let child = child as usize;
                if child >= self.body_count {
                    let m = self.cell_mass(child);
                    let c = self.cell_centroid(child);
                    let k = self.ranges[child][1];
                    mass += m;
                    weighted += c * m;
                    plain += c * k as f32;
                    count += k;
                } else {
                    let mut body = child as i32;
                    while body != EMPTY_SLOT {
                        let p = &particles[body as usize];
                        mass += p.mass;
                        weighted += p.pos() * p.mass;
                        plain += p.pos();
                        count += 1;
                        body = self.next[body as usize];
                    }
                }
            }

            let offset = cell - self.body_count;
            self.mass[offset] = mass;
            self.centroid[offset] = if mass > 0.0 {
                weighted / mass
            } else if count > 0 {
                plain / count as f32
            } else {
                Vec2::ZERO
            };
            self.ranges[cell][1] = count;
        }
    }

    /// Sort pass: assign every node a contiguous interval of the locality order, parents first
    pub fn sort(&mut self) {
        let root = self.root();
        self.ranges[root][0] = 0;
        for cell in (self.bottom..=root).rev() {
            let mut start = self.ranges[cell][0];
            for q in 0..4 {
                let child = self.child(cell, q);
                if child == EMPTY_SLOT {
                    continue;
                }
                let child = child as usize;
                if child >= self.body_count {
                    self.ranges[child][0] = start;
                    start += self.ranges[child][1];
                } else {
                    let mut len = 0;
                    let mut body = child as i32;
                    while body != EMPTY_SLOT {
                        self.sorted[(start + len) as usize] = body as u32;
                        len += 1;
                        body = self.next[body as usize];
                    }
                    self.ranges[child] = [start, len];
                    start += len;
                }
            }
        }
    }

    /// Child of `cell` whose interval contains `position`
    fn child_containing(&self, cell: usize, position: u32) -> Option<usize> {
        (0..4).find_map(|q| {
            let child = self.child(cell, q);
            if child == EMPTY_SLOT {
                return None;
            }
            let [start, count] = self.ranges[child as usize];
            (start <= position && position < start + count).then_some(child as usize)
        })
    }

    /// Force pass for one body: stack-free walk over the sorted intervals.
    ///
    /// Starting at interval position 0, descend from the root to the node covering the
    /// position until a cell passes the opening test or a leaf chain is reached, then skip
    /// past that node's interval.
    pub fn acceleration(&self, particles: &[Particle], body: usize, params: &StepParams) -> Vec2 {
        let target = particles[body].pos();
        let softening_sq = params.softening * params.softening;
        let theta_sq = params.theta * params.theta;
        let root = self.root();
        let total = self.ranges[root][1];

        let mut acc = Vec2::ZERO;
        let mut position = 0;
        while position < total {
            let mut node = root;
            loop {
                let Some(child) = self.child_containing(node, position) else {
                    position = total;
                    break;
                };
                let [start, count] = self.ranges[child];

                if child < self.body_count {
                    for &other in &self.sorted[start as usize..(start + count) as usize] {
                        let other = other as usize;
                        if other != body {
                            let p = &particles[other];
                            acc += softened_acceleration(
                                target,
                                p.pos(),
                                p.mass,
                                params.gravity,
                                softening_sq,
                            );
                        }
                    }
                    position = start + count;
                    break;
                }

                let centroid = self.cell_centroid(child);
                let width = self.width[child - self.body_count];
                if width * width < theta_sq * (centroid - target).length_squared() {
                    acc += softened_acceleration(
                        target,
                        centroid,
                        self.cell_mass(child),
                        params.gravity,
                        softening_sq,
                    );
                    position = start + count;
                    break;
                }
                node = child;
            }
        }
        acc
    }
}

/// One Barnes-Hut step from `input` into `output`: box, tree, center, sort and force passes
pub fn barnes_hut_step(
    input: &[Particle],
    output: &mut [Particle],
    params: &StepParams,
    capacity: u32,
) -> Result<QuadTree> {
    if input.len() != output.len() {
        return Err(Error::config("particle slots must be equally sized"));
    }

    let bounds = compute_bounds(input);
    let mut tree = QuadTree::build(input, bounds, capacity)?;
    tree.summarize(input);
    tree.sort();

    output
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, out)| {
            let p = &input[i];
            *out = if p.is_padding() {
                *p
            } else {
                integrate(p, tree.acceleration(input, i, params), params.dt)
            };
        });
    Ok(tree)
}
