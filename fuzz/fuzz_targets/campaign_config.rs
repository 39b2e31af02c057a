#![no_main]

use libfuzzer_sys::fuzz_target;
use hashprobe::config::CampaignConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Anything that loads must pass validation
        if let Ok(config) = CampaignConfig::from_toml_str(input) {
            assert!(config.validate().is_ok());
        }
    }
});
