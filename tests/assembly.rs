mod common;

use common::Fixture;
use soulforge::assembly::AssemblyState;
use std::fs;

fn backups(fixture: &Fixture) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(fixture.managed_dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("Assembly-CSharp.dll."))
        .collect();
    names.sort();
    names
}

#[test]
fn vanilla_mode_twice_renames_once() {
    let fixture = Fixture::new();
    let managed = fixture.managed_dir();
    fs::write(managed.join("Assembly-CSharp.dll"), b"MZ modded").unwrap();
    fs::write(managed.join("Assembly-CSharp.dll.v"), b"MZ vanilla").unwrap();
    let manager = fixture.manager_with_game();
    assert_eq!(manager.assembly_state().unwrap(), AssemblyState::Modded);

    let first = manager.set_vanilla_mode(true).unwrap().unwrap();
    assert_eq!(first.renamed, 2);
    assert_eq!(first.to, AssemblyState::Vanilla);

    let second = manager.set_vanilla_mode(true).unwrap().unwrap();
    assert_eq!(second.renamed, 0);

    assert_eq!(backups(&fixture), vec!["Assembly-CSharp.dll.m".to_string()]);
    assert_eq!(fs::read(managed.join("Assembly-CSharp.dll")).unwrap(), b"MZ vanilla");
    assert!(manager.vanilla_mode());
}

#[test]
fn leaving_vanilla_mode_restores_the_modded_assembly() {
    let fixture = Fixture::new();
    let managed = fixture.managed_dir();
    fs::write(managed.join("Assembly-CSharp.dll"), b"MZ vanilla").unwrap();
    fs::write(managed.join("Assembly-CSharp.dll.m"), b"MZ modded").unwrap();
    let manager = fixture.manager_with_game();

    let outcome = manager.set_vanilla_mode(false).unwrap().unwrap();
    assert_eq!(outcome.from, AssemblyState::Vanilla);
    assert_eq!(outcome.to, AssemblyState::Modded);
    assert_eq!(fs::read(managed.join("Assembly-CSharp.dll")).unwrap(), b"MZ modded");
    assert_eq!(backups(&fixture), vec!["Assembly-CSharp.dll.v".to_string()]);
}

#[test]
fn vanilla_flag_persists_without_a_game() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    assert!(manager.set_vanilla_mode(true).unwrap().is_none());
    drop(manager);

    assert!(fixture.manager().vanilla_mode());
}

#[test]
fn never_switched_game_is_left_alone() {
    let fixture = Fixture::new();
    let manager = fixture.manager_with_game();
    assert_eq!(manager.assembly_state().unwrap(), AssemblyState::Unconfigured);

    let outcome = manager.set_vanilla_mode(true).unwrap().unwrap();
    assert_eq!(outcome.renamed, 0);
    assert!(backups(&fixture).is_empty());
}

#[test]
fn missing_active_file_still_restores_the_backup() {
    let fixture = Fixture::new();
    let managed = fixture.managed_dir();
    fs::write(managed.join("Assembly-CSharp.dll"), b"MZ modded").unwrap();
    fs::write(managed.join("Assembly-CSharp.dll.v"), b"MZ vanilla").unwrap();
    let manager = fixture.manager_with_game();
    assert_eq!(manager.assembly_state().unwrap(), AssemblyState::Modded);
    fs::remove_file(managed.join("Assembly-CSharp.dll")).unwrap();

    let outcome = manager.set_vanilla_mode(true).unwrap().unwrap();
    assert_eq!(outcome.from, AssemblyState::Modded);
    assert_eq!(outcome.renamed, 1);
    assert_eq!(fs::read(managed.join("Assembly-CSharp.dll")).unwrap(), b"MZ vanilla");
    assert!(backups(&fixture).is_empty());
}

#[test]
fn interrupted_switch_keeps_both_builds() {
    let fixture = Fixture::new();
    let managed = fixture.managed_dir();
    fs::write(managed.join("Assembly-CSharp.dll"), b"MZ modded").unwrap();
    fs::write(managed.join("Assembly-CSharp.dll.v"), b"MZ vanilla").unwrap();
    let manager = fixture.manager_with_game();
    assert_eq!(manager.assembly_state().unwrap(), AssemblyState::Modded);
    fs::rename(
        managed.join("Assembly-CSharp.dll"),
        managed.join("Assembly-CSharp.dll.m"),
    )
    .unwrap();

    assert_eq!(manager.assembly_state().unwrap(), AssemblyState::Vanilla);
    assert_eq!(fs::read(managed.join("Assembly-CSharp.dll")).unwrap(), b"MZ vanilla");
    assert_eq!(fs::read(managed.join("Assembly-CSharp.dll.m")).unwrap(), b"MZ modded");

    let back = manager.set_vanilla_mode(false).unwrap().unwrap();
    assert_eq!(back.renamed, 2);
    assert_eq!(fs::read(managed.join("Assembly-CSharp.dll")).unwrap(), b"MZ modded");
    assert_eq!(backups(&fixture), vec!["Assembly-CSharp.dll.v".to_string()]);
}
