use keelphys_core::{Error, Result};

pub(crate) const COLOR_UNMARKED: u16 = u16::MAX;
pub(crate) const COLOR_MARKED: u16 = u16::MAX - 1;
pub(crate) const MAX_COLORS: usize = (1 << 16) - 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PairKind {
    ParticleParticle,
    ParticleRigidBody,
    ParticleStaticBody,
    RigidBodyRigidBody,
    RigidBodyStaticBody,
}

/// Broadphase-reported pair in canonical order: particle before rigid body
/// before static body; same-kind pairs keep enumeration order.
#[derive(Copy, Clone, Debug)]
pub(crate) struct NeighborPair {
    pub objects: [u32; 2],
    pub kind: PairKind,
    pub color: u16,
}

impl NeighborPair {
    pub fn new(objects: [u32; 2], kind: PairKind) -> Self {
        Self { objects, kind, color: COLOR_UNMARKED }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum DynamicRef {
    Particle(u32),
    RigidBody(u32),
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct GroupRange {
    pub objects_begin: u32,
    pub objects_end: u32,
    pub pairs_begin: u32,
    pub pairs_end: u32,
}

/// Connected components over the dynamic pair graph. Objects and pair
/// indices are appended contiguously; each group records its ranges.
pub(crate) struct NeighborGroups {
    objects: Vec<DynamicRef>,
    pairs: Vec<u32>,
    groups: Vec<GroupRange>,
    max_objects: usize,
    max_pairs: usize,
    max_groups: usize,
}

impl NeighborGroups {
    pub fn new(max_objects: usize, max_pairs: usize, max_groups: usize) -> Self {
        Self {
            objects: Vec::with_capacity(max_objects),
            pairs: Vec::with_capacity(max_pairs),
            groups: Vec::with_capacity(max_groups),
            max_objects,
            max_pairs,
            max_groups,
        }
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.pairs.clear();
        self.groups.clear();
    }

    #[inline] pub fn group_count(&self) -> usize { self.groups.len() }
    #[inline] pub fn object_count(&self) -> usize { self.objects.len() }
    #[inline] pub fn group(&self, index: usize) -> GroupRange { self.groups[index] }
    #[inline] pub fn object(&self, index: usize) -> DynamicRef { self.objects[index] }
    #[inline] pub fn pair(&self, index: usize) -> u32 { self.pairs[index] }

    pub fn begin_group(&mut self) -> Result<()> {
        if self.groups.len() == self.max_groups {
            return Err(Error::CapacityExceeded("neighbor groups"));
        }
        let objects = self.objects.len() as u32;
        let pairs = self.pairs.len() as u32;
        self.groups.push(GroupRange {
            objects_begin: objects,
            objects_end: objects,
            pairs_begin: pairs,
            pairs_end: pairs,
        });
        Ok(())
    }

    pub fn push_object(&mut self, object: DynamicRef) -> Result<()> {
        if self.objects.len() == self.max_objects {
            return Err(Error::CapacityExceeded("neighbor group objects"));
        }
        self.objects.push(object);
        self.groups.last_mut().expect("open group").objects_end += 1;
        Ok(())
    }

    pub fn push_pair(&mut self, pair_index: u32) -> Result<()> {
        if self.pairs.len() == self.max_pairs {
            return Err(Error::CapacityExceeded("neighbor group pairs"));
        }
        self.pairs.push(pair_index);
        self.groups.last_mut().expect("open group").pairs_end += 1;
        Ok(())
    }
}

#[derive(Copy, Clone, Default)]
struct ColorRange {
    begin: u32,
    end: u32,
}

/// Per-color pair buckets. During coloring `count` builds a histogram;
/// `reserve` turns it into bucket ranges; `push` then files each pair index
/// under its color. Colors form a dense prefix, so walks stop at the first
/// empty bucket.
pub(crate) struct ColorGroups {
    pairs: Vec<u32>,
    ranges: Vec<ColorRange>,
    max_pairs: usize,
}

impl ColorGroups {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(max_pairs),
            ranges: vec![ColorRange::default(); MAX_COLORS],
            max_pairs,
        }
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.ranges.fill(ColorRange::default());
    }

    pub fn count(&mut self, color: u16) {
        self.ranges[color as usize].end += 1;
    }

    pub fn reserve(&mut self) -> Result<()> {
        let mut cursor = 0u32;
        for range in self.ranges.iter_mut() {
            if range.end == 0 {
                break;
            }
            let count = range.end;
            range.begin = cursor;
            range.end = cursor;
            cursor += count;
        }
        if cursor as usize > self.max_pairs {
            return Err(Error::CapacityExceeded("color group pairs"));
        }
        self.pairs.resize(cursor as usize, 0);
        Ok(())
    }

    pub fn push(&mut self, pair_index: u32, color: u16) {
        let range = &mut self.ranges[color as usize];
        self.pairs[range.end as usize] = pair_index;
        range.end += 1;
    }

    #[inline]
    pub fn range(&self, color: u16) -> (u32, u32) {
        let range = self.ranges[color as usize];
        (range.begin, range.end)
    }

    #[inline]
    pub fn pairs_ptr(&self) -> *const u32 {
        self.pairs.as_ptr()
    }
}
