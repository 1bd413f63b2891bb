use super::*;

#[test]
fn image_name_from_parts() {
    assert_eq!(
        ImageName::from_parts(None, "busybox", None, None)
            .unwrap()
            .as_parts(),
        (None, "busybox", None, None)
    );
    assert!(ImageName::from_parts(None, "localhost", None, None).is_ok());
    assert!(ImageName::from_parts(None, "library/busybox", Some("1.36"), None).is_ok());
    assert!(ImageName::from_parts(None, "localhost/busybox", None, None).is_err());
    assert!(ImageName::from_parts(None, "quay.io/busybox", None, None).is_err());
    assert!(ImageName::from_parts(Some("quay.io"), "busybox", None, None).is_ok());
    assert!(ImageName::from_parts(Some("registry:5000"), "team/app", Some("v1"), None).is_ok());
}

#[test]
fn parse_image_name() {
    assert!(ImageName::parse("alpine").is_ok());
    assert!(ImageName::parse("alpine/").is_err());
    assert!(ImageName::parse("/alpine").is_err());
    assert!(ImageName::parse(" alpine").is_err());
    assert!(ImageName::parse("alpine ").is_err());
    assert!(ImageName::parse("").is_err());
    assert!(ImageName::parse("Alpine").is_err());
    assert!(ImageName::parse("-alpine").is_err());
    assert!(ImageName::parse("a--lpine").is_ok());
    assert!(ImageName::parse("alpine:").is_err());
    assert!(ImageName::parse("alpine:.x").is_err());
    assert!(ImageName::parse("alpine:3.19").is_ok());
    assert!(ImageName::parse("library//alpine").is_err());
    assert!(ImageName::parse("quay.io:/alpine").is_err());
    assert!(ImageName::parse("quay.io:443/alpine").is_ok());
    assert!(ImageName::parse("alpine@sha256:abc").is_err());

    assert_eq!(
        ImageName::parse("library/alpine:3.19").unwrap().as_parts(),
        (None, "library/alpine", Some("3.19"), None)
    );
    assert_eq!(
        ImageName::parse("ghcr.io/org/team/tool:v2").unwrap().as_parts(),
        (Some("ghcr.io"), "org/team/tool", Some("v2"), None)
    );
    assert_eq!(
        ImageName::parse("localhost:5000/app").unwrap().as_parts(),
        (Some("localhost:5000"), "app", None, None)
    );
    assert_eq!(
        ImageName::parse("app:1@sha256:00112233445566778899aabbccddeeff")
            .unwrap()
            .as_parts(),
        (
            None,
            "app",
            Some("1"),
            Some("sha256:00112233445566778899aabbccddeeff")
        )
    );

    let name = ImageName::parse("localhost").unwrap();
    assert_eq!(name.registry(), None);
    assert_eq!(name.repository().as_str(), "localhost");
    assert_eq!(name.tag(), None);
    assert_eq!(name.content_digest(), None);
    assert_eq!(
        ImageName::parse("quay.io/a/b:c").unwrap().to_string(),
        "quay.io/a/b:c"
    );
}

#[test]
fn parse_digest() {
    assert!(ContentDigest::parse("sha256").is_err());
    assert!(ContentDigest::parse("sha256:0123456789abcdef0123456789abcdef").is_ok());
    assert!(ContentDigest::parse("sha256:0123456789abcdef0123456789abcde").is_err());
    assert!(ContentDigest::parse("sha256:0123456789ABCDEF0123456789abcdef").is_err());
    assert!(ContentDigest::parse(":0123456789abcdef0123456789abcdef").is_err());
    assert!(ContentDigest::parse("9x:0123456789abcdef0123456789abcdef").is_err());
    assert!(ContentDigest::parse("multihash+base58:0123456789abcdef0123456789abcdef").is_ok());

    let digest = ContentDigest::parse("sha512:0123456789abcdef0123456789abcdef").unwrap();
    assert_eq!(digest.algorithm(), "sha512");
    assert!(!digest.is_sha256());
    assert_eq!(
        ContentDigest::from_content(b"").hex_str(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn registry_transport() {
    assert!(Registry::parse("registry-1.docker.io").unwrap().is_https());
    assert!(Registry::parse("example.com:8443").unwrap().is_https());
    assert!(!Registry::parse("localhost:5000").unwrap().is_https());
    assert!(!Registry::parse("127.0.0.1:5000").unwrap().is_https());
    assert!(!Registry::parse("mirror.internal").unwrap().plain_http().is_https());
    assert_eq!(
        Registry::parse("127.0.0.1:5000").unwrap().api_root(),
        "http://127.0.0.1:5000/v2/"
    );
    assert_eq!(Registry::parse("example.com:8443").unwrap().port(), Some(8443));
    assert_eq!(Registry::parse("example.com:8443").unwrap().domain_str(), "example.com");
    assert!(Registry::parse("example.com:99999").is_err());
}

#[test]
fn parse_platform() {
    assert_eq!(Platform::parse("arm64").unwrap(), Platform::linux("arm64"));
    assert_eq!(
        Platform::parse("linux/arm/v7").unwrap(),
        Platform {
            os: "linux".into(),
            architecture: "arm".into(),
            variant: Some("v7".into()),
        }
    );
    assert_eq!(Platform::parse("windows/amd64").unwrap().os, "windows");
    assert!(Platform::parse("").is_err());
    assert!(Platform::parse("linux//amd64").is_err());
    assert!(Platform::parse("a/b/c/d").is_err());
    assert_eq!(Platform::parse("linux/arm64/v8").unwrap().to_string(), "linux/arm64/v8");
}

#[test]
fn reference_naming() {
    let reference = ImageReference::new(
        "registry-1.docker.io".parse().unwrap(),
        "library/alpine".parse().unwrap(),
        Some("3.19".parse().unwrap()),
    );
    assert_eq!(reference.repo_tag(), "alpine:3.19");
    assert_eq!(reference.local_name(), "alpine");
    assert_eq!(reference.pull_scope(), "repository:library/alpine:pull");
    assert_eq!(
        reference.archive_file_name("amd64"),
        "library_alpine_3.19_amd64.tar"
    );
    assert_eq!(reference.version().as_str(), "3.19");

    let pinned = reference.with_digest(ContentDigest::from_content(b"manifest"));
    assert!(matches!(pinned.version(), ImageVersion::ContentDigest(_)));

    let other = ImageReference::new(
        "ghcr.io".parse().unwrap(),
        "org/tool".parse().unwrap(),
        None,
    );
    assert_eq!(other.repo_tag(), "org/tool:latest");
}
