//! Basic smoke test to verify crate compiles.

#[test]
fn crate_compiles() {
    // If this test runs, the public surface is wired up.
    let _ = std::any::type_name::<leasewarden::EngineConfig>();
    let _ = std::any::type_name::<leasewarden::LicenseError>();
    let _ = std::any::type_name::<leasewarden::LicenseEngine>();
    let _ = std::any::type_name::<leasewarden::FloatingSession>();
}
