//! BSP node helpers shared by the renderer and movement code.

use glam::Vec2;

use crate::base::fixed::fixed_to_float;
use crate::world::geometry::{BspChild, Level, Node, SubSectorId};

impl Node {
    /// 0 = front of the partition line, 1 = back.
    ///
    /// Uses a 2D cross product of the node direction against the vector
    /// from the node origin to the point.
    #[inline(always)]
    pub fn point_side(&self, p: Vec2) -> usize {
        let dx = p.x - fixed_to_float(self.x);
        let dy = p.y - fixed_to_float(self.y);
        let cross = dx * fixed_to_float(self.dy) - dy * fixed_to_float(self.dx);
        if cross >= 0.0 { 0 } else { 1 }
    }
}

impl Level {
    /// Walk the BSP and return the subsector containing `p`.
    pub fn locate_subsector(&self, p: Vec2) -> SubSectorId {
        let root = &self.nodes[self.bsp_root() as usize];
        let mut child = root.children[root.point_side(p)];
        loop {
            match child {
                BspChild::SubSector(ss) => return ss,
                BspChild::Node(n) => {
                    let node = &self.nodes[n as usize];
                    child = node.children[node.point_side(p)];
                }
            }
        }
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
