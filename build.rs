fn main() {
    // CoreBluetooth only lets a process scan when its binary carries an
    // Info.plist with NSBluetoothAlwaysUsageDescription. A CLI tool has no app
    // bundle, so the plist goes into the __TEXT,__info_plist Mach-O section.
    //
    // CARGO_CFG_TARGET_OS is the target OS, so a Linux → macOS cross build
    // still gets the section.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }

    let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR not set, skipping Info.plist embedding");
        return;
    };
    let plist = format!("{manifest_dir}/Info.plist");

    for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
        println!("cargo:rustc-link-arg={arg}");
    }
    println!("cargo:rerun-if-changed=Info.plist");
}
