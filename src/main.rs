//! Minimal interactive viewer for the 3D engine core.
//!
//! ```bash
//! cargo run --release -- <game.rez> --map 1
//! ```
//!
//! Free-flies a camera through a loaded map: arrow keys turn and move,
//! Alt strafes, Page Up/Down adjusts the eye height offset.

use clap::Parser;
use minifb::{Key, Window, WindowOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use threedoom::base::angle::{ANG45, ANG90, Angle, angle_to_fine, fine_cosine, fine_sine};
use threedoom::base::fixed::{Fixed, fixed_mul, fixed_to_float};
use threedoom::renderer::{Renderer, ViewParams};
use threedoom::rez::{CelImageCache, ResourceFile};
use threedoom::video::{FrameBuffer, SCREEN_HEIGHT, SCREEN_WIDTH};
use threedoom::world::{SpriteBank, TextureBank, load_level};

/// Number of resources one map occupies in the archive.
const LUMPS_PER_MAP: u32 = 9;

const EYE_HEIGHT: Fixed = 41 << 16;
const MOVE_SPEED: Fixed = 8 << 16;
const TURN_SPEED: Angle = ANG45 / 16;

#[derive(Parser)]
#[command(about = "Software-rendered 3DO Doom map viewer")]
struct Args {
    /// Path to the game resource file
    rez_file: PathBuf,

    /// Map number to view (1-based)
    #[arg(short, long, default_value_t = 1)]
    map: u32,

    /// Resource number of the first lump of map 1
    #[arg(long, default_value_t = 200)]
    first_map_rez: u32,

    /// Resource number of the texture info resource
    #[arg(long, default_value_t = 2)]
    texture_info_rez: u32,

    /// Resource numbers of the three sky wall textures
    #[arg(long, num_args = 3, default_values_t = vec![20u32, 21, 22])]
    sky_rez: Vec<u32>,

    /// View size index (0 = largest 280x160 ... 5 = smallest 128x80)
    #[arg(long, default_value_t = 0)]
    screen_size: usize,

    /// Render all walls at uniform brightness
    #[arg(long)]
    no_fake_contrast: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    /*----------- load everything up front ----------------------------*/
    let rez = ResourceFile::from_file(&args.rez_file)?;

    let mut textures = TextureBank::init(&rez, args.texture_info_rez)?;
    textures.select_sky_for_map(
        args.map,
        [args.sky_rez[0], args.sky_rez[1], args.sky_rez[2]],
    );

    let map_start = args.first_map_rez + (args.map - 1) * LUMPS_PER_MAP;
    let level = load_level(&rez, map_start, !args.no_fake_contrast)?;
    textures.load_for_level(&rez, &level)?;

    // The viewer spawns no actors and draws no weapon.
    let sprites = SpriteBank::new(0, 0);
    let cel_images = CelImageCache::new();

    let mut renderer = Renderer::new(args.screen_size);
    let mut fb = FrameBuffer::new();

    println!(
        "map {}: {} sectors, {} segs, {} subsectors",
        args.map,
        level.sectors.len(),
        level.segs.len(),
        level.subsectors.len()
    );

    /*----------- camera starts at the map's center -------------------*/
    let (mut cam_x, mut cam_y) = {
        let n = level.vertices.len().max(1) as i64;
        let sum = level
            .vertices
            .iter()
            .fold((0i64, 0i64), |(x, y), v| (x + v.x as i64, y + v.y as i64));
        ((sum.0 / n) as Fixed, (sum.1 / n) as Fixed)
    };
    let mut cam_angle: Angle = ANG90;
    let mut z_offset: Fixed = 0;

    /*----------- window and frame loop -------------------------------*/
    let mut win = Window::new(
        "3DO Doom software render",
        SCREEN_WIDTH,
        SCREEN_HEIGHT,
        WindowOptions {
            scale: minifb::Scale::X2,
            ..WindowOptions::default()
        },
    )?;
    win.set_target_fps(60);

    let mut acc_time = Duration::ZERO;
    let mut acc_frames = 0usize;
    let mut last_print = Instant::now();

    while win.is_open() && !win.is_key_down(Key::Escape) {
        /*----- input ----------------------------------------------*/
        let alt = win.is_key_down(Key::LeftAlt) || win.is_key_down(Key::RightAlt);
        let fine = angle_to_fine(cam_angle);
        let (dir_x, dir_y) = (fine_cosine(fine), fine_sine(fine));

        let mut forward: Fixed = 0;
        let mut strafe: Fixed = 0;
        if win.is_key_down(Key::Up) || win.is_key_down(Key::W) {
            forward += MOVE_SPEED;
        }
        if win.is_key_down(Key::Down) || win.is_key_down(Key::S) {
            forward -= MOVE_SPEED;
        }
        if win.is_key_down(Key::A) || (alt && win.is_key_down(Key::Left)) {
            strafe -= MOVE_SPEED;
        }
        if win.is_key_down(Key::D) || (alt && win.is_key_down(Key::Right)) {
            strafe += MOVE_SPEED;
        }
        if !alt {
            if win.is_key_down(Key::Left) {
                cam_angle = cam_angle.wrapping_add(TURN_SPEED);
            }
            if win.is_key_down(Key::Right) {
                cam_angle = cam_angle.wrapping_sub(TURN_SPEED);
            }
        }
        if win.is_key_down(Key::PageUp) {
            z_offset += MOVE_SPEED / 4;
        }
        if win.is_key_down(Key::PageDown) {
            z_offset -= MOVE_SPEED / 4;
        }

        cam_x += fixed_mul(forward, dir_x) + fixed_mul(strafe, dir_y);
        cam_y += fixed_mul(forward, dir_y) - fixed_mul(strafe, dir_x);

        // Eye height rides the floor of whatever sector we are in.
        let cam_z = {
            let p = glam::vec2(fixed_to_float(cam_x), fixed_to_float(cam_y));
            let floor = if level.nodes.is_empty() {
                0
            } else {
                let ss = level.locate_subsector(p);
                let sector = level.subsectors[ss as usize].sector;
                level.sectors[sector as usize].floor_h
            };
            floor + EYE_HEIGHT + z_offset
        };

        /*----- render ---------------------------------------------*/
        let t0 = Instant::now();
        fb.debug_clear();
        renderer.draw_player_view(
            &level,
            &textures,
            &sprites,
            &cel_images,
            &ViewParams {
                x: cam_x,
                y: cam_y,
                z: cam_z,
                angle: cam_angle,
                extra_light: 0,
            },
            &[],
            false,
            &mut fb,
        );
        acc_time += t0.elapsed();
        acc_frames += 1;

        win.update_with_buffer(fb.pixels(), SCREEN_WIDTH, SCREEN_HEIGHT)?;

        if last_print.elapsed() >= Duration::from_secs(3) {
            let avg_ms = acc_time.as_secs_f64() * 1000.0 / acc_frames.max(1) as f64;
            println!("avg render: {avg_ms:.2} ms  ({:.1} FPS)", 1000.0 / avg_ms);
            acc_time = Duration::ZERO;
            acc_frames = 0;
            last_print = Instant::now();
        }
    }
    Ok(())
}
