//! Player motion, wall collision, item pickup, and bomb ballistics — the
//! pieces of the tick body that only depend on the static scene, never on
//! connections or the registry.

use std::f32::consts::PI;

pub const PLAYER_SIZE: f32 = 0.5;
pub const PLAYER_SPEED: f32 = 2.0;
pub const PLAYER_RADIUS: f32 = 0.5;
pub const BOMB_LIFETIME: f32 = 2.0;
pub const BOMB_THROW_VELOCITY: f32 = 5.0;
pub const BOMB_GRAVITY: f32 = 10.0;
pub const BOMB_DAMP: f32 = 0.8;
pub const BOMB_SCALE: f32 = 0.25;
pub const BOMB_POOL_SIZE: usize = 20;
pub const SCENE_SIZE: usize = 7;

/// Four independent movement bits: forward, backward, turn-left, turn-right.
pub mod moving_bit {
    pub const FORWARD: u8 = 0b0001;
    pub const BACKWARD: u8 = 0b0010;
    pub const TURN_LEFT: u8 = 0b0100;
    pub const TURN_RIGHT: u8 = 0b1000;
}

/// A 7x7 grid of solid tiles. A pure input, never mutated by simulation.
#[derive(Debug, Clone)]
pub struct Scene {
    walls: [[bool; SCENE_SIZE]; SCENE_SIZE],
}

impl Scene {
    pub fn new(walls: [[bool; SCENE_SIZE]; SCENE_SIZE]) -> Self {
        Self { walls }
    }

    fn is_solid(&self, ix: i32, iy: i32) -> bool {
        if ix < 0 || iy < 0 || ix as usize >= SCENE_SIZE || iy as usize >= SCENE_SIZE {
            return true;
        }
        self.walls[iy as usize][ix as usize]
    }

    /// True iff an axis-aligned box of `PLAYER_SIZE` centered at `(x, y)`
    /// overlaps no solid tile. Computed from the integer floor of the four
    /// corners, matching the original rectangle-fits test.
    pub fn player_fits(&self, x: f32, y: f32) -> bool {
        let half = PLAYER_SIZE / 2.0;
        let corners = [
            (x - half, y - half),
            (x + half, y - half),
            (x - half, y + half),
            (x + half, y + half),
        ];
        corners
            .into_iter()
            .all(|(cx, cy)| !self.is_solid(cx.floor() as i32, cy.floor() as i32))
    }

    fn tile_is_solid(&self, x: f32, y: f32) -> bool {
        self.is_solid(x.floor() as i32, y.floor() as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Key,
    Bomb,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub kind: ItemKind,
    pub x: f32,
    pub y: f32,
    pub alive: bool,
}

/// Authoritative position, orientation, and movement intent of one player.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub dir: f32,
    pub hue: u8,
    pub moving: u8,
    pub new_moving: u8,
}

impl Player {
    pub fn new(id: u32, x: f32, y: f32, dir: f32, hue: u8) -> Self {
        Self {
            id,
            x,
            y,
            dir,
            hue,
            moving: 0,
            new_moving: 0,
        }
    }

    fn direction_unit_vector(&self) -> (f32, f32) {
        (self.dir.cos(), self.dir.sin())
    }

    /// Integrates motion for one tick: rotation first, then axis-separated
    /// translation so a player can slide along a wall instead of stopping
    /// dead at the first blocked axis.
    pub fn integrate(&mut self, dt: f32, scene: &Scene) {
        let forward = (self.moving & moving_bit::FORWARD != 0) as i32 as f32;
        let backward = (self.moving & moving_bit::BACKWARD != 0) as i32 as f32;
        let turn_right = (self.moving & moving_bit::TURN_RIGHT != 0) as i32 as f32;
        let turn_left = (self.moving & moving_bit::TURN_LEFT != 0) as i32 as f32;

        let angular_velocity = (turn_right - turn_left) * PI;
        self.dir = (self.dir + angular_velocity * dt).rem_euclid(2.0 * PI);

        let (ux, uy) = self.direction_unit_vector();
        let control = forward - backward;
        let vx = ux * control * PLAYER_SPEED;
        let vy = uy * control * PLAYER_SPEED;

        let new_x = self.x + vx * dt;
        if scene.player_fits(new_x, self.y) {
            self.x = new_x;
        }
        let new_y = self.y + vy * dt;
        if scene.player_fits(self.x, new_y) {
            self.y = new_y;
        }
    }
}

/// A slot in the fixed-capacity bomb pool. Free iff `lifetime <= 0.0`.
#[derive(Debug, Clone, Copy)]
pub struct Bomb {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
    pub lifetime: f32,
}

impl Bomb {
    pub fn is_free(&self) -> bool {
        self.lifetime <= 0.0
    }

    fn free() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            dx: 0.0,
            dy: 0.0,
            dz: 0.0,
            lifetime: 0.0,
        }
    }

    fn throw(x: f32, y: f32, dir: f32) -> Self {
        Self {
            x,
            y,
            z: 0.6,
            dx: dir.cos() * BOMB_THROW_VELOCITY,
            dy: dir.sin() * BOMB_THROW_VELOCITY,
            dz: 0.5 * BOMB_THROW_VELOCITY,
            lifetime: BOMB_LIFETIME,
        }
    }

    /// Integrates one tick of ballistic motion. Returns `true` if lifetime
    /// just crossed zero (an explosion event for this tick), and whether a
    /// collision bounced the bomb hard enough that a sound would trigger
    /// client-side (tracked but never broadcast, per design).
    fn integrate(&mut self, dt: f32, scene: &Scene) -> (bool, bool) {
        if self.is_free() {
            return (false, false);
        }

        self.lifetime -= dt;
        self.dz -= BOMB_GRAVITY * dt;

        let mut collided = false;

        let new_x = self.x + self.dx * dt;
        let new_y = self.y + self.dy * dt;
        if scene.tile_is_solid(new_x, new_y) {
            if self.x.floor() != new_x.floor() {
                self.dx = -self.dx;
            }
            if self.y.floor() != new_y.floor() {
                self.dy = -self.dy;
            }
            self.dx *= BOMB_DAMP;
            self.dy *= BOMB_DAMP;
            collided = true;
        } else {
            self.x = new_x;
            self.y = new_y;
        }

        let new_z = self.z + self.dz * dt;
        if new_z < BOMB_SCALE || new_z > 1.0 {
            self.dz = -self.dz * BOMB_DAMP;
            self.dx *= BOMB_DAMP;
            self.dy *= BOMB_DAMP;
            collided = true;
        } else {
            self.z = new_z;
        }

        if collided {
            let speed = (self.dx * self.dx + self.dy * self.dy + self.dz * self.dz).sqrt();
            collided = speed > 1.0;
        }

        let exploded = self.lifetime <= 0.0;
        if exploded {
            *self = Bomb::free();
        }
        (exploded, collided)
    }
}

/// The fixed-capacity pool of bomb slots.
#[derive(Debug, Clone)]
pub struct BombPool {
    slots: [Bomb; BOMB_POOL_SIZE],
}

impl Default for BombPool {
    fn default() -> Self {
        Self {
            slots: [Bomb::free(); BOMB_POOL_SIZE],
        }
    }
}

impl BombPool {
    /// Finds the first free slot and seeds it for a throw from `(x, y)` in
    /// direction `dir`. Returns the slot index on success.
    pub fn throw(&mut self, x: f32, y: f32, dir: f32) -> Option<usize> {
        let index = self.slots.iter().position(Bomb::is_free)?;
        self.slots[index] = Bomb::throw(x, y, dir);
        Some(index)
    }

    pub fn get(&self, index: usize) -> &Bomb {
        &self.slots[index]
    }

    /// Integrates every active slot one tick, returning the indices of slots
    /// whose lifetime just crossed zero.
    pub fn integrate_all(&mut self, dt: f32, scene: &Scene) -> Vec<usize> {
        let mut exploded = Vec::new();
        for (index, bomb) in self.slots.iter_mut().enumerate() {
            let (just_exploded, _collided) = bomb.integrate(dt, scene);
            if just_exploded {
                exploded.push(index);
            }
        }
        exploded
    }
}

/// The scene, item table, and bomb pool bundled together — everything the
/// tick body's simulation step needs besides the player map itself.
pub struct World {
    pub scene: Scene,
    pub items: Vec<Item>,
    pub bombs: BombPool,
}

impl World {
    pub fn new(scene: Scene, items: Vec<Item>) -> Self {
        Self {
            scene,
            items,
            bombs: BombPool::default(),
        }
    }

    /// Integrates every player's motion, flips alive=false on items within
    /// pickup radius, and integrates every bomb slot. Returns the indices of
    /// items collected and bombs exploded this tick.
    pub fn integrate(
        &mut self,
        players: &mut std::collections::HashMap<u32, Player>,
        dt: f32,
    ) -> (Vec<u32>, Vec<u32>) {
        let mut collected = Vec::new();
        for player in players.values_mut() {
            player.integrate(dt, &self.scene);
            for (index, item) in self.items.iter_mut().enumerate() {
                if !item.alive {
                    continue;
                }
                let dist = ((player.x - item.x).powi(2) + (player.y - item.y).powi(2)).sqrt();
                if dist < PLAYER_RADIUS {
                    item.alive = false;
                    collected.push(index as u32);
                }
            }
        }

        let exploded = self
            .bombs
            .integrate_all(dt, &self.scene)
            .into_iter()
            .map(|i| i as u32)
            .collect();

        (collected, exploded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_scene() -> Scene {
        Scene::new([[false; SCENE_SIZE]; SCENE_SIZE])
    }

    fn walled_scene() -> Scene {
        let mut walls = [[false; SCENE_SIZE]; SCENE_SIZE];
        for row in walls.iter_mut() {
            row[6] = true;
        }
        Scene::new(walls)
    }

    #[test]
    fn player_moves_forward_in_open_scene() {
        let scene = open_scene();
        let mut player = Player::new(1, 1.0, 1.0, 0.0, 0);
        player.moving = moving_bit::FORWARD;
        player.integrate(1.0, &scene);
        assert!((player.x - 3.0).abs() < 1e-5);
        assert!((player.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn player_stays_out_of_solid_tiles() {
        let scene = walled_scene();
        let mut player = Player::new(1, 5.5, 3.0, 0.0, 0);
        player.moving = moving_bit::FORWARD;
        for _ in 0..120 {
            player.integrate(1.0 / 60.0, &scene);
            assert!(scene.player_fits(player.x, player.y));
        }
    }

    #[test]
    fn bomb_stops_at_a_diagonal_corner_even_when_each_axis_alone_is_clear() {
        // Solid only at tile (2, 2); the adjacent (2, 1) and (1, 2) tiles the
        // bomb would cross on each axis individually are both clear.
        let mut walls = [[false; SCENE_SIZE]; SCENE_SIZE];
        walls[2][2] = true;
        let scene = Scene::new(walls);

        let mut bomb = Bomb {
            x: 1.5,
            y: 1.5,
            z: 0.6,
            dx: 1.0,
            dy: 1.0,
            dz: 0.0,
            lifetime: BOMB_LIFETIME,
        };
        bomb.integrate(1.0, &scene);

        assert!((bomb.x - 1.5).abs() < 1e-5);
        assert!((bomb.y - 1.5).abs() < 1e-5);
    }

    #[test]
    fn bomb_throw_occupies_first_free_slot() {
        let mut pool = BombPool::default();
        let index = pool.throw(1.0, 1.0, 0.0).unwrap();
        assert_eq!(index, 0);
        assert!(!pool.get(0).is_free());
    }

    #[test]
    fn bomb_explodes_after_lifetime_elapses() {
        let scene = open_scene();
        let mut pool = BombPool::default();
        pool.throw(3.0, 3.0, 0.0);

        let dt = 1.0 / 60.0;
        let ticks = (BOMB_LIFETIME / dt).ceil() as usize + 1;
        let mut exploded_at = None;
        for tick in 0..ticks {
            let exploded = pool.integrate_all(dt, &scene);
            if !exploded.is_empty() {
                exploded_at = Some((tick, exploded));
                break;
            }
        }
        let (_, exploded) = exploded_at.expect("bomb should explode within its lifetime");
        assert_eq!(exploded, vec![0]);
        assert!(pool.get(0).is_free());
    }

    #[test]
    fn item_pickup_radius() {
        let item = Item {
            kind: ItemKind::Key,
            x: 2.5,
            y: 1.5,
            alive: true,
        };
        let player = Player::new(1, 2.5, 1.5, 0.0, 0);
        let dist = ((player.x - item.x).powi(2) + (player.y - item.y).powi(2)).sqrt();
        assert!(dist < PLAYER_RADIUS);
    }
}
