//! SDK configuration built from explicit settings

use aws_config::{BehaviorVersion, Region, SdkConfig};
use stackpilot_config::AwsSettings;
use tracing::info;

/// Resolve an SDK config from settings, falling back to the default
/// credential and region chain for anything left unset.
pub async fn load_sdk_config(settings: &AwsSettings) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = &settings.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(profile) = &settings.profile {
        loader = loader.profile_name(profile);
    }
    if let Some(endpoint) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    let config = loader.load().await;
    info!(
        region = config.region().map(|r| r.as_ref()).unwrap_or("<unset>"),
        profile = settings.profile.as_deref().unwrap_or("<default>"),
        "Loaded AWS configuration"
    );
    config
}

/// SDK accessors for members the service model marks as required return
/// plain references; the rest return `Option`. This folds both into `Option`.
pub(crate) trait Field<'a, T: ?Sized> {
    fn field(self) -> Option<&'a T>;
}

impl<'a, T: ?Sized> Field<'a, T> for Option<&'a T> {
    fn field(self) -> Option<&'a T> {
        self
    }
}

impl<'a, T: ?Sized> Field<'a, T> for &'a T {
    fn field(self) -> Option<&'a T> {
        Some(self)
    }
}
