#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    terminusdb_desktop_lib::run()
}
