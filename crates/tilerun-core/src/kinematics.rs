//! Default platformer controls: walking, gravity, and jumping against SOLID tiles.
//!
//! Movement is resolved one axis at a time in steps of at most one world
//! unit, so an entity never tunnels through a single-cell wall. The stage
//! edge behaves like a wall because cells outside the grid count as solid.

use crate::entity::EntityId;
use crate::geometry::Rect;
use crate::hooks::Controls;
use crate::input::Buttons;
use crate::tile::TileGrid;
use crate::world::World;

/// Simple axis-aligned platformer kinematics. All speeds are per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Kinematics {
    pub walk_speed: f32,
    pub gravity: f32,
    pub jump_speed: f32,
    pub max_fall: f32,
    vx: f32,
    vy: f32,
    grounded: bool,
}

impl Default for Kinematics {
    fn default() -> Self {
        Self {
            walk_speed: 2.0,
            gravity: 0.5,
            jump_speed: 8.0,
            max_fall: 10.0,
            vx: 0.0,
            vy: 0.0,
            grounded: false,
        }
    }
}

impl Kinematics {
    pub fn new(walk_speed: f32, gravity: f32, jump_speed: f32, max_fall: f32) -> Self {
        Self {
            walk_speed,
            gravity,
            jump_speed,
            max_fall,
            ..Self::default()
        }
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.vx, self.vy)
    }

    pub fn is_grounded(&self) -> bool {
        self.grounded
    }
}

/// Move `rect` along one axis by `delta`, stopping before the first solid cell.
/// Returns the distance actually travelled and whether a wall was hit.
fn sweep(tiles: &TileGrid, mut rect: Rect, delta: f32, horizontal: bool) -> (f32, bool) {
    if !delta.is_finite() || !rect.is_finite() {
        return (0.0, false);
    }
    let mut moved = 0.0;
    // Anything with an extent crosses the grid edge long before this.
    let reach = tiles.width().max(tiles.height()) as f32 + 2.0;
    let mut left = delta.abs().min(reach);
    let sign = delta.signum();
    while left > 0.0 {
        let step = left.min(1.0) * sign;
        let mut probe = rect;
        if horizontal {
            probe.x += step;
        } else {
            probe.y += step;
        }
        let (x0, y0, x1, y1) = probe.cell_span();
        if tiles.any_solid(x0, y0, x1, y1) {
            // Close the remaining gap up to the cell boundary.
            let (near, far) = if horizontal {
                (rect.x, rect.right())
            } else {
                (rect.y, rect.bottom())
            };
            let gap = if sign > 0.0 {
                far.ceil() - far
            } else {
                near - near.floor()
            };
            if gap < step.abs() {
                moved += gap * sign;
            }
            return (moved, true);
        }
        rect = probe;
        moved += step;
        left -= step.abs();
    }
    (moved, false)
}

impl Controls for Kinematics {
    fn drive(&mut self, world: &mut World, me: EntityId, input: &Buttons) -> anyhow::Result<()> {
        let rect = world.entity(me)?.rect();
        let tiles = world.tiles();

        self.vx = match (input.left, input.right) {
            (true, false) => -self.walk_speed,
            (false, true) => self.walk_speed,
            _ => 0.0,
        };

        let (below, _) = sweep(tiles, rect, 1.0, false);
        self.grounded = below == 0.0;
        if self.grounded && input.special1 {
            self.vy = -self.jump_speed;
        } else if !self.grounded {
            self.vy = (self.vy + self.gravity).min(self.max_fall);
        } else if self.vy > 0.0 {
            self.vy = 0.0;
        }

        let (dx, _) = sweep(tiles, rect, self.vx, true);
        let shifted = Rect::new(rect.x + dx, rect.y, rect.w, rect.h);
        let (dy, hit_y) = sweep(tiles, shifted, self.vy, false);
        if hit_y {
            if self.vy > 0.0 {
                self.grounded = true;
            }
            self.vy = 0.0;
        }

        let entity = world.entity_mut(me)?;
        entity.pos.x += dx;
        entity.pos.y += dy;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Entity;

    /// 8x6 open room with a solid floor on the bottom row.
    fn room() -> World {
        let mut rows = vec![vec![1u8; 8]; 5];
        rows.push(vec![0u8; 8]);
        World::new(TileGrid::from_rows(&rows).unwrap())
    }

    fn spawn(world: &mut World, x: f32, y: f32) -> EntityId {
        let id = world.add_entity(Entity::controllable("hero", x, y, 1.0, 1.0, 0));
        world.flush();
        id
    }

    #[test]
    fn falls_until_floor() {
        let mut world = room();
        let id = spawn(&mut world, 2.0, 0.0);
        let mut k = Kinematics::default();
        for _ in 0..30 {
            k.drive(&mut world, id, &Buttons::NEUTRAL).unwrap();
        }
        assert_eq!(world.entity(id).unwrap().pos.y, 4.0);
        assert!(k.is_grounded());
    }

    #[test]
    fn walls_stop_horizontal_motion() {
        let mut world = room();
        let id = spawn(&mut world, 1.0, 4.0);
        let mut k = Kinematics::default();
        let left = Buttons {
            left: true,
            ..Buttons::NEUTRAL
        };
        for _ in 0..5 {
            k.drive(&mut world, id, &left).unwrap();
        }
        assert_eq!(world.entity(id).unwrap().pos.x, 0.0);
    }

    #[test]
    fn jump_only_from_ground() {
        let mut world = room();
        let id = spawn(&mut world, 2.0, 4.0);
        let mut k = Kinematics::default();
        let jump = Buttons {
            special1: true,
            ..Buttons::NEUTRAL
        };
        k.drive(&mut world, id, &jump).unwrap();
        let y_after_jump = world.entity(id).unwrap().pos.y;
        assert!(y_after_jump < 4.0);

        k.drive(&mut world, id, &jump).unwrap();
        assert!(k.velocity().1 > -k.jump_speed, "no second jump mid-air");
    }

    #[test]
    fn sweep_is_bounded_by_the_grid() {
        let world = room();
        let tiles = world.tiles();
        let hero = Rect::new(2.0, 4.0, 1.0, 1.0);
        assert_eq!(sweep(tiles, hero, 1e30, true), (5.0, true));
        assert_eq!(sweep(tiles, hero, f32::INFINITY, true), (0.0, false));
        assert_eq!(sweep(tiles, hero, f32::NAN, false), (0.0, false));

        let broken = Rect::new(f32::NAN, 0.0, 1.0, 1.0);
        assert_eq!(sweep(tiles, broken, 1e30, true), (0.0, false));
        // A zero-size rect never touches a wall; the reach cap ends the walk.
        let point = Rect::new(2.0, 2.0, 0.0, 0.0);
        assert_eq!(sweep(tiles, point, 1e30, true), (10.0, false));
    }
}
