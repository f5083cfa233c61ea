use tauri::{
    image::Image,
    menu::{MenuBuilder, MenuItemBuilder, PredefinedMenuItem},
    tray::TrayIconBuilder,
    App, AppHandle,
};

use crate::state::ServerStatus;
use crate::window;

pub const TRAY_ID: &str = "terminusdb-tray";

const ICON_READY: &[u8] = include_bytes!("../icons/tray-ready.png");
const ICON_STARTING: &[u8] = include_bytes!("../icons/tray-starting.png");
const ICON_ERROR: &[u8] = include_bytes!("../icons/tray-error.png");

type IconResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Decode a PNG into the 8-bit RGBA buffer tray icons expect. Palettes and
/// 16-bit channels are normalised by the decoder first.
fn decode_png(data: &[u8]) -> IconResult<Image<'static>> {
    let mut decoder = png::Decoder::new(data);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;
    buf.truncate(frame.buffer_size());

    let rgba = match frame.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], u8::MAX])
            .collect(),
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0], px[1]])
            .collect(),
        png::ColorType::Grayscale => buf.iter().flat_map(|&g| [g, g, g, u8::MAX]).collect(),
        other => return Err(format!("unsupported icon color type {:?}", other).into()),
    };

    Ok(Image::new_owned(rgba, frame.width, frame.height))
}

fn icon_bytes(status: ServerStatus) -> &'static [u8] {
    match status {
        ServerStatus::Ready => ICON_READY,
        ServerStatus::Starting => ICON_STARTING,
        ServerStatus::NotFound | ServerStatus::Terminated | ServerStatus::Failed => ICON_ERROR,
    }
}

pub fn icon_for_status(status: ServerStatus) -> IconResult<Image<'static>> {
    decode_png(icon_bytes(status))
}

fn tooltip(status: ServerStatus) -> String {
    match status {
        ServerStatus::Ready => "TerminusDB".to_string(),
        other => format!("TerminusDB ({})", other.label()),
    }
}

pub fn setup(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    let menu = MenuBuilder::new(app)
        .item(&MenuItemBuilder::with_id("show", "TerminusDB").build(app)?)
        .item(&PredefinedMenuItem::separator(app)?)
        .item(&MenuItemBuilder::with_id("hide", "Hide").build(app)?)
        .item(&MenuItemBuilder::with_id("tray-reload", "Reload").build(app)?)
        .item(&MenuItemBuilder::with_id("quit", "Quit").build(app)?)
        .build()?;

    TrayIconBuilder::with_id(TRAY_ID)
        .icon(icon_for_status(ServerStatus::Starting)?)
        .menu(&menu)
        .tooltip(tooltip(ServerStatus::Starting))
        .on_menu_event(handle_menu_event)
        .build(app)?;

    Ok(())
}

/// Reflect the server status in the tray tooltip and icon.
pub fn update(app: &AppHandle, status: ServerStatus) {
    let Some(tray) = app.tray_by_id(TRAY_ID) else {
        return;
    };

    let _ = tray.set_tooltip(Some(tooltip(status)));
    match icon_for_status(status) {
        Ok(icon) => {
            let _ = tray.set_icon(Some(icon));
        }
        Err(e) => log::warn!("Bad tray icon: {}", e),
    }
}

// Receives events from the tray menu and the main window's menu alike.
fn handle_menu_event(app: &AppHandle, event: tauri::menu::MenuEvent) {
    match event.id().as_ref() {
        "show" => window::show(app),
        "hide" => window::hide(app),
        "tray-reload" => {
            window::show(app);
            window::reload(app);
        }
        "reload" | "reload-f5" => window::reload(app),
        "back" => window::back(app),
        "forward" => window::forward(app),
        "open-in-browser" => window::open_in_browser(),
        "devtools" => window::toggle_devtools(app),
        "quit" => app.exit(0),
        other => log::debug!("Unhandled menu event: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_icons_decode() {
        for status in [
            ServerStatus::NotFound,
            ServerStatus::Starting,
            ServerStatus::Ready,
            ServerStatus::Failed,
        ] {
            let icon = icon_for_status(status).unwrap();
            assert_eq!(
                icon.rgba().len(),
                (icon.width() * icon.height() * 4) as usize
            );
        }
    }

    fn encode(color: png::ColorType, width: u32, height: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out
    }

    #[test]
    fn rgb_and_grayscale_icons_gain_an_opaque_alpha() {
        let rgb = decode_png(&encode(png::ColorType::Rgb, 2, 1, &[1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(rgb.rgba(), &[1, 2, 3, 255, 4, 5, 6, 255]);

        let gray = decode_png(&encode(png::ColorType::Grayscale, 2, 1, &[7, 9])).unwrap();
        assert_eq!(gray.rgba(), &[7, 7, 7, 255, 9, 9, 9, 255]);

        let gray_alpha =
            decode_png(&encode(png::ColorType::GrayscaleAlpha, 1, 1, &[8, 100])).unwrap();
        assert_eq!(gray_alpha.rgba(), &[8, 8, 8, 100]);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode_png(b"not a png").is_err());
    }

    #[test]
    fn tooltip_names_non_ready_states() {
        assert_eq!(tooltip(ServerStatus::Ready), "TerminusDB");
        assert_eq!(tooltip(ServerStatus::Starting), "TerminusDB (starting)");
        assert_eq!(
            tooltip(ServerStatus::NotFound),
            "TerminusDB (server not found)"
        );
    }
}
