//! Shell bodies of the individual bootstrap stages
//!
//! Every body is specialised to the target's canonical OS at generation time,
//! so two raw identifiers that canonicalize to the same OS produce the same
//! text.

use super::os::{OsId, PackageManager, TargetFacts};
use crate::config::{Paths, PlatformConfig};
use crate::exec::shell;
use crate::proxy::config::{default_middlewares, static_config, to_yaml};
use crate::error::Result;

pub(crate) fn preamble(config: &PlatformConfig, facts: &TargetFacts) -> String {
    format!(
        r#"OS_TYPE="{os}"
OS_VERSION="{version}"
SYS_ARCH="{arch}"
DOCKER_VERSION={docker}
TARGET_USER="${{ORIGINAL_USER:-${{SUDO_USER:-$USER}}}}"

timestamp() {{
	date -u '+%Y-%m-%d %H:%M:%S UTC'
}}

log_step() {{
	printf '\n[%s] %s\n' "$(timestamp)" "$1"
}}

log_substep() {{
	printf '  - %s\n' "$1"
}}

command_exists() {{
	command -v "$@" > /dev/null 2>&1
}}

log_step "Installing requirements for OS: $OS_TYPE"
log_substep "CPU Architecture: $SYS_ARCH"
log_substep "Operating System: $OS_TYPE $OS_VERSION"
log_substep "Docker Version Target: $DOCKER_VERSION"
"#,
        os = facts.os,
        version = facts.os_version,
        arch = facts.arch,
        docker = config.tools.docker,
    )
}

pub(crate) fn install_utilities(facts: &TargetFacts) -> String {
    match facts.os.package_manager() {
        PackageManager::Pacman => {
            "pacman -Sy --noconfirm --needed curl wget git git-lfs jq openssl >/dev/null || true\n".to_string()
        }
        PackageManager::Apk => r#"sed -i '/^#.*\/community/s/^#//' /etc/apk/repositories
apk update >/dev/null
apk add curl wget git git-lfs jq openssl sudo unzip tar >/dev/null
"#
        .to_string(),
        PackageManager::Apt => r#"DEBIAN_FRONTEND=noninteractive apt-get update -y >/dev/null
DEBIAN_FRONTEND=noninteractive apt-get install -y unzip curl wget git git-lfs jq openssl >/dev/null
"#
        .to_string(),
        PackageManager::Dnf if facts.os == OsId::AmazonLinux => {
            "dnf install -y findutils wget git git-lfs jq openssl >/dev/null\n".to_string()
        }
        PackageManager::Dnf => r#"if ! command_exists dnf; then
	yum install -y dnf >/dev/null
fi
if ! command_exists curl; then
	dnf install -y curl >/dev/null
fi
dnf install -y wget git git-lfs jq openssl unzip >/dev/null
"#
        .to_string(),
        PackageManager::Zypper => r#"zypper refresh >/dev/null
zypper install -y curl wget git git-lfs jq openssl >/dev/null
"#
        .to_string(),
    }
}

pub(crate) fn check_port(port: u16) -> String {
    format!(
        r#"if ss -tulnp | grep ':{port} ' >/dev/null; then
	echo "Something is already running on port {port}" >&2
	exit 1
fi
echo "Port {port} is available ✅"
"#
    )
}

pub(crate) fn install_rclone() -> String {
    r#"if command_exists rclone; then
	echo "RClone already installed ✅"
else
	curl -fsSL https://rclone.org/install.sh | bash
	RCLONE_VERSION=$(rclone --version | head -n 1 | awk '{print $2}' | sed 's/^v//')
	echo "RClone version $RCLONE_VERSION installed ✅"
fi
"#
    .to_string()
}

const MANUAL_DOCKER: &str = "Please visit https://docs.docker.com/engine/install/ and install Docker manually to continue.";

fn docker_package_install(facts: &TargetFacts) -> String {
    let verify = format!(
        r#"if ! command_exists docker; then
	echo " - Docker could not be installed automatically. {MANUAL_DOCKER}"
	exit 1
fi
"#
    );
    let systemd = "systemctl start docker >/dev/null 2>&1\nsystemctl enable docker >/dev/null 2>&1\n";

    match facts.os {
        OsId::AlmaLinux => format!(
            "dnf config-manager --add-repo=https://download.docker.com/linux/centos/docker-ce.repo >/dev/null 2>&1\n\
             dnf install -y docker-ce docker-ce-cli containerd.io docker-compose-plugin >/dev/null 2>&1\n\
             {verify}{systemd}"
        ),
        OsId::OpenCloudOs => format!(
            r#"dnf install -y docker >/dev/null 2>&1
{verify}if [ -f "/etc/sysconfig/docker" ]; then
	echo " - Removing --live-restore parameter from Docker configuration..."
	sed -i 's/--live-restore[^[:space:]]*//' /etc/sysconfig/docker
	sed -i 's/  */ /g' /etc/sysconfig/docker
fi
{systemd}echo " - Docker configured for OpenCloud OS"
"#
        ),
        OsId::Alpine => format!(
            "apk add docker docker-cli-compose >/dev/null 2>&1\n\
             rc-update add docker default >/dev/null 2>&1\n\
             service docker start >/dev/null 2>&1\n\
             {verify}"
        ),
        OsId::Arch => format!(
            "pacman -Sy docker docker-compose --noconfirm >/dev/null 2>&1\n\
             systemctl enable docker.service >/dev/null 2>&1\n\
             systemctl start docker.service >/dev/null 2>&1\n\
             {verify}"
        ),
        OsId::AmazonLinux => format!(
            r#"dnf install docker -y >/dev/null 2>&1
DOCKER_CONFIG=/usr/local/lib/docker
mkdir -p $DOCKER_CONFIG/cli-plugins
curl -sL https://github.com/docker/compose/releases/latest/download/docker-compose-$(uname -s)-$(uname -m) -o $DOCKER_CONFIG/cli-plugins/docker-compose
chmod +x $DOCKER_CONFIG/cli-plugins/docker-compose
{systemd}{verify}"#
        ),
        OsId::Fedora => format!(
            r#"if command_exists dnf5; then
	dnf config-manager addrepo --from-repofile=https://download.docker.com/linux/fedora/docker-ce.repo --overwrite >/dev/null 2>&1
else
	dnf config-manager --add-repo=https://download.docker.com/linux/fedora/docker-ce.repo >/dev/null 2>&1
fi
dnf install -y docker-ce docker-ce-cli containerd.io docker-compose-plugin >/dev/null 2>&1
{verify}{systemd}"#
        ),
        os => {
            let mut body = String::new();
            if os == OsId::Ubuntu && facts.os_version == "24.10" {
                body.push_str(
                    "echo \"Docker automated installation is not supported on Ubuntu 24.10 (non-LTS release).\"\n\
                     echo \"Please install Docker manually.\"\n\
                     exit 1\n",
                );
                return body;
            }
            body.push_str(&format!(
                r#"curl -s https://releases.rancher.com/install-docker/$DOCKER_VERSION.sh | sh 2>&1 || true
if ! command_exists docker; then
	curl -s https://get.docker.com | sh -s -- --version $DOCKER_VERSION 2>&1
	if ! command_exists docker; then
		echo " - Docker installation failed."
		echo "   Maybe your OS is not supported?"
		echo " - {MANUAL_DOCKER}"
		exit 1
	fi
fi
"#
            ));
            if matches!(os, OsId::Rocky | OsId::Centos) {
                body.push_str(systemd);
            }
            body
        }
    }
}

pub(crate) fn install_docker(config: &PlatformConfig, facts: &TargetFacts) -> String {
    let install = docker_package_install(facts);
    let install = install
        .lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("\t{}", line) })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"if command_exists snap && snap list docker >/dev/null 2>&1; then
	echo " - Docker is installed via snap."
	echo "   {brand} does not support Docker installed via snap."
	echo "   Please remove Docker with snap (snap remove docker) and reexecute this script."
	exit 1
fi

if command_exists docker; then
	echo " - Docker is installed ✅"
else
	echo " - Docker is not installed. Installing Docker. It may take a while."
{install}
	echo " - Docker installed successfully ✅"
	if [ -n "$TARGET_USER" ] && [ "$TARGET_USER" != "root" ] && id "$TARGET_USER" >/dev/null 2>&1; then
		if id -nG "$TARGET_USER" | grep -qw docker; then
			echo " - User $TARGET_USER already in docker group."
		else
			usermod -aG docker "$TARGET_USER"
			echo " - Added $TARGET_USER to docker group (log out/in required to apply)."
		fi
	fi
fi
"#,
        brand = config.brand_name,
    )
}

pub(crate) fn setup_swarm() -> String {
    r#"if docker info 2>/dev/null | grep -q 'Swarm: active'; then
	echo "Already part of a Docker Swarm ✅"
	exit 0
fi

get_ip() {
	for flag in -4s -6s; do
		for url in https://ifconfig.io https://icanhazip.com https://ipecho.net/plain; do
			ip=$(curl $flag --connect-timeout 5 "$url" 2>/dev/null || true)
			if [ -n "$ip" ]; then
				echo "$ip"
				return 0
			fi
		done
	done
	return 1
}

advertise_addr="${ADVERTISE_ADDR:-}"
if [ -z "$advertise_addr" ]; then
	if ! advertise_addr=$(get_ip); then
		echo "Error: Could not determine server IP address automatically (neither IPv4 nor IPv6)." >&2
		echo "Please set the ADVERTISE_ADDR environment variable manually." >&2
		exit 1
	fi
fi
echo "Advertise address: $advertise_addr"
docker swarm init --advertise-addr "$advertise_addr"
echo "Swarm initialized ✅"
"#
    .to_string()
}

pub(crate) fn setup_network(network: &str) -> String {
    format!(
        r#"if docker network inspect {network} >/dev/null 2>&1; then
	echo "Network {network} already exists ✅"
else
	docker network create --driver overlay --attachable {network}
	echo "Network {network} created ✅"
fi
"#
    )
}

pub(crate) fn setup_directories(paths: &Paths) -> String {
    let mut body = String::new();
    for dir in paths.all() {
        let dir = shell::quote(&dir.display().to_string());
        body.push_str(&format!(
            "mkdir -p {dir}\nchown -R \"$TARGET_USER:$TARGET_USER\" {dir}\nchmod 755 {dir}\n"
        ));
    }
    body.push_str(&format!(
        "chmod 700 {}\necho \"Directories ready under {} ✅\"\n",
        shell::quote(&paths.ssh.display().to_string()),
        paths.base.display()
    ));
    body
}

pub(crate) fn proxy_static_config(config: &PlatformConfig, paths: &Paths) -> Result<String> {
    let document = to_yaml(&static_config(&config.proxy, &config.network_name, paths))?;
    let mut body = shell::restrict_if_present(&paths.acme_store(), 0o600);
    body.push_str(&shell::write_if_absent(
        &paths.traefik_config(),
        &document,
        "Traefik config",
    ));
    Ok(body)
}

pub(crate) fn proxy_middlewares(paths: &Paths) -> Result<String> {
    let document = to_yaml(&default_middlewares())?;
    Ok(shell::write_if_absent(
        &paths.middlewares_config(),
        &document,
        "Middlewares config",
    ))
}

pub(crate) fn proxy_instance(config: &PlatformConfig, paths: &Paths) -> String {
    let proxy = &config.proxy;
    let name = &proxy.container_name;
    format!(
        r#"if docker service inspect {name} >/dev/null 2>&1; then
	echo "Migrating Traefik to Standalone..."
	docker service rm {name}
	sleep 8
	echo "Traefik migrated to Standalone ✅"
fi

if docker inspect {name} >/dev/null 2>&1; then
	echo "Traefik already exists ✅"
else
	docker run -d \
		--name {name} \
		--network {network} \
		--restart unless-stopped \
		-v {config_file}:/etc/traefik/traefik.yml \
		-v {dynamic}:{dynamic} \
		-v /var/run/docker.sock:/var/run/docker.sock \
		-p {https}:{https} \
		-p {http}:{http} \
		-p {http3}:{http3}/udp \
		{image}
	echo "Traefik version {version} installed ✅"
fi
"#,
        network = config.network_name,
        config_file = paths.traefik_config().display(),
        dynamic = paths.traefik_dynamic.display(),
        https = proxy.https_port,
        http = proxy.http_port,
        http3 = proxy.http3_port,
        image = proxy.image_ref(),
        version = proxy.version,
    )
}

pub(crate) fn install_nixpacks(config: &PlatformConfig) -> String {
    format!(
        r#"if command_exists nixpacks; then
	echo "Nixpacks already installed ✅"
else
	export NIXPACKS_VERSION={version}
	bash -c "$(curl -fsSL https://nixpacks.com/install.sh)"
	echo "Nixpacks version $NIXPACKS_VERSION installed ✅"
fi
"#,
        version = config.tools.nixpacks
    )
}

pub(crate) fn install_buildpacks(config: &PlatformConfig, facts: &TargetFacts) -> String {
    let suffix = if matches!(facts.arch.as_str(), "aarch64" | "arm64") {
        "-arm64"
    } else {
        ""
    };
    format!(
        r#"if command_exists pack; then
	echo "Buildpacks already installed ✅"
else
	BUILDPACKS_VERSION={version}
	curl -sSL "https://github.com/buildpacks/pack/releases/download/v$BUILDPACKS_VERSION/pack-v$BUILDPACKS_VERSION-linux{suffix}.tgz" | tar -C /usr/local/bin/ --no-same-owner -xzv pack
	echo "Buildpacks version $BUILDPACKS_VERSION installed ✅"
fi
"#,
        version = config.tools.buildpacks,
    )
}

pub(crate) fn install_railpack(config: &PlatformConfig) -> String {
    format!(
        r#"if command_exists railpack; then
	echo "Railpack already installed ✅"
else
	export RAILPACK_VERSION={version}
	bash -c "$(curl -fsSL https://railpack.com/install.sh)"
	echo "Railpack version $RAILPACK_VERSION installed ✅"
fi
"#,
        version = config.tools.railpack
    )
}
