// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub use anyhow::{anyhow, bail, Context};

pub use glam::{Mat3, Mat4, Vec3, Vec4};

pub use itertools::Itertools;
pub use std::collections::{BTreeSet, HashMap, HashSet};

pub use crate::mesh::halfedge;
pub use crate::mesh::halfedge::*;

pub use hedron_commons::utils::*;
